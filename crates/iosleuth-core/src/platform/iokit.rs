//! IOKit backend — implements the registry seam over the real macOS
//! device/service registry via direct framework FFI.
//!
//! Handle ownership follows the trait contract: `IoKitEntry` releases its
//! `io_object_t` on drop, `IoKitConnection` closes its `io_connect_t` on
//! drop. Iterators own and release their `io_iterator_t` the same way.

#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

use crate::registry::{Connection, Entry, RawHandle, Registry, Status};
use compact_str::CompactString;
use std::ffi::{c_char, c_void, CStr, CString};

type mach_port_t = u32;
type kern_return_t = i32;
type io_object_t = mach_port_t;
type io_connect_t = mach_port_t;
type io_iterator_t = mach_port_t;
type boolean_t = u32;

type CFTypeRef = *const c_void;
type CFStringRef = *const c_void;
type CFDataRef = *const c_void;
type CFDictionaryRef = *const c_void;
type CFMutableDictionaryRef = *mut c_void;
type CFAllocatorRef = *const c_void;
type CFIndex = isize;

/// Registry names are bounded by the host at 128 bytes.
const IO_NAME_LEN: usize = 128;
/// Inband property reads are bounded at 4096 bytes.
const INBAND_LEN: usize = 4096;

const MACH_PORT_NULL: mach_port_t = 0;
const MACH_PORT_DEAD: mach_port_t = u32::MAX;
const KERN_SUCCESS: kern_return_t = 0;

const K_IO_REGISTRY_ITERATE_RECURSIVELY: u32 = 0x00000001;
const K_CF_STRING_ENCODING_UTF8: u32 = 0x0800_0100;
const K_CF_PROPERTY_LIST_XML_FORMAT_V1_0: CFIndex = 100;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    fn IORegistryGetRootEntry(master_port: mach_port_t) -> io_object_t;
    fn IORegistryCreateIterator(
        master_port: mach_port_t,
        plane: *const c_char,
        options: u32,
        iterator: *mut io_iterator_t,
    ) -> kern_return_t;
    fn IOIteratorNext(iterator: io_iterator_t) -> io_object_t;
    fn IOObjectRelease(object: io_object_t) -> kern_return_t;
    fn IORegistryEntryGetName(entry: io_object_t, name: *mut c_char) -> kern_return_t;
    fn IOObjectCopyClass(object: io_object_t) -> CFStringRef;
    fn IOObjectCopySuperclassForClass(class: CFStringRef) -> CFStringRef;
    fn IOObjectConformsTo(object: io_object_t, class_name: *const c_char) -> boolean_t;
    fn IOServiceOpen(
        service: io_object_t,
        owning_task: mach_port_t,
        type_code: u32,
        connect: *mut io_connect_t,
    ) -> kern_return_t;
    fn IOServiceClose(connect: io_connect_t) -> kern_return_t;
    fn IORegistryEntryGetChildIterator(
        entry: io_object_t,
        plane: *const c_char,
        iterator: *mut io_iterator_t,
    ) -> kern_return_t;
    fn IORegistryEntryGetProperty(
        entry: io_object_t,
        property_name: *const c_char,
        buffer: *mut c_char,
        size: *mut u32,
    ) -> kern_return_t;
    fn IORegistryEntryCreateCFProperties(
        entry: io_object_t,
        properties: *mut CFMutableDictionaryRef,
        allocator: CFAllocatorRef,
        options: u32,
    ) -> kern_return_t;
    fn IORegistryEntrySetCFProperties(entry: io_object_t, properties: CFTypeRef)
        -> kern_return_t;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    static kCFTypeDictionaryKeyCallBacks: c_void;
    static kCFTypeDictionaryValueCallBacks: c_void;

    fn CFStringCreateWithCString(
        alloc: CFAllocatorRef,
        c_str: *const c_char,
        encoding: u32,
    ) -> CFStringRef;
    fn CFStringGetCString(
        string: CFStringRef,
        buffer: *mut c_char,
        buffer_size: CFIndex,
        encoding: u32,
    ) -> boolean_t;
    fn CFDictionaryCreate(
        allocator: CFAllocatorRef,
        keys: *const *const c_void,
        values: *const *const c_void,
        num_values: CFIndex,
        key_callbacks: *const c_void,
        value_callbacks: *const c_void,
    ) -> CFDictionaryRef;
    fn CFPropertyListCreateData(
        allocator: CFAllocatorRef,
        property_list: CFTypeRef,
        format: CFIndex,
        options: u64,
        error: *mut CFTypeRef,
    ) -> CFDataRef;
    fn CFDataGetBytePtr(data: CFDataRef) -> *const u8;
    fn CFDataGetLength(data: CFDataRef) -> CFIndex;
    fn CFRelease(cf: CFTypeRef);
}

extern "C" {
    fn mach_error_string(error_value: kern_return_t) -> *const c_char;
    static mach_task_self_: mach_port_t;
}

/// Lookup failure code used when a CF-level call gives us no status of
/// its own (kIOReturnError).
const STATUS_ERROR: Status = Status(0xE00002BCu32 as i32);

fn cf_string_to_compact(string: CFStringRef) -> Option<CompactString> {
    if string.is_null() {
        return None;
    }
    let mut buf = [0 as c_char; IO_NAME_LEN];
    // SAFETY: `string` is a live CFString and the buffer bounds are
    // passed alongside the buffer.
    let ok = unsafe {
        CFStringGetCString(
            string,
            buf.as_mut_ptr(),
            buf.len() as CFIndex,
            K_CF_STRING_ENCODING_UTF8,
        )
    };
    if ok == 0 {
        return None;
    }
    // SAFETY: CFStringGetCString nul-terminates on success.
    let cstr = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(CompactString::new(cstr.to_string_lossy()))
}

fn cf_string_from(s: &str) -> Option<CFStringRef> {
    let c = CString::new(s).ok()?;
    // SAFETY: `c` is a valid nul-terminated string for the duration of
    // the call; CF copies the bytes.
    let string = unsafe {
        CFStringCreateWithCString(std::ptr::null(), c.as_ptr(), K_CF_STRING_ENCODING_UTF8)
    };
    if string.is_null() {
        None
    } else {
        Some(string)
    }
}

/// The real IOKit registry.
///
/// A null master port selects the default master port on every supported
/// macOS version.
#[derive(Debug, Default, Clone, Copy)]
pub struct IoKitRegistry;

impl IoKitRegistry {
    pub fn new() -> Self {
        IoKitRegistry
    }
}

/// Owned `io_object_t`; released exactly once, on drop.
pub struct IoKitEntry(io_object_t);

impl Drop for IoKitEntry {
    fn drop(&mut self) {
        if self.0 != MACH_PORT_NULL {
            // SAFETY: we hold the only reference this process took.
            unsafe { IOObjectRelease(self.0) };
        }
    }
}

/// Owned `io_connect_t`; closed exactly once, on drop.
pub struct IoKitConnection(io_connect_t);

impl Drop for IoKitConnection {
    fn drop(&mut self) {
        if self.0 != MACH_PORT_NULL {
            // SAFETY: the connection was opened by us and not yet closed.
            unsafe { IOServiceClose(self.0) };
        }
    }
}

impl Connection for IoKitConnection {
    fn raw(&self) -> RawHandle {
        self.0 as RawHandle
    }

    fn is_valid(&self) -> bool {
        self.0 != MACH_PORT_NULL && self.0 != MACH_PORT_DEAD
    }
}

/// Owned `io_iterator_t` yielding owned entries.
pub struct IoKitIter(io_iterator_t);

impl Drop for IoKitIter {
    fn drop(&mut self) {
        if self.0 != MACH_PORT_NULL {
            // SAFETY: iterator handle owned by this value.
            unsafe { IOObjectRelease(self.0) };
        }
    }
}

impl Iterator for IoKitIter {
    type Item = IoKitEntry;

    fn next(&mut self) -> Option<IoKitEntry> {
        // SAFETY: the iterator handle is live until drop.
        let obj = unsafe { IOIteratorNext(self.0) };
        if obj == MACH_PORT_NULL {
            None
        } else {
            Some(IoKitEntry(obj))
        }
    }
}

impl Entry for IoKitEntry {
    type Connection = IoKitConnection;
    type ChildIter = IoKitIter;

    fn name(&self) -> Result<CompactString, Status> {
        let mut buf = [0 as c_char; IO_NAME_LEN];
        // SAFETY: the buffer is io_name_t sized, as the call requires.
        let ret = unsafe { IORegistryEntryGetName(self.0, buf.as_mut_ptr()) };
        if ret != KERN_SUCCESS {
            return Err(Status(ret));
        }
        // SAFETY: the host nul-terminates names on success.
        let cstr = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Ok(CompactString::new(cstr.to_string_lossy()))
    }

    fn class_name(&self) -> Result<CompactString, Status> {
        // SAFETY: `self.0` is a live registry entry.
        let class = unsafe { IOObjectCopyClass(self.0) };
        let result = cf_string_to_compact(class).ok_or(STATUS_ERROR);
        if !class.is_null() {
            // SAFETY: IOObjectCopyClass follows the copy rule.
            unsafe { CFRelease(class) };
        }
        result
    }

    fn conforms_to(&self, class: &str) -> bool {
        let Ok(c) = CString::new(class) else {
            return false;
        };
        // SAFETY: `c` outlives the call.
        unsafe { IOObjectConformsTo(self.0, c.as_ptr()) != 0 }
    }

    fn children(&self, plane: &str) -> Result<IoKitIter, Status> {
        let c_plane = CString::new(plane).map_err(|_| STATUS_ERROR)?;
        let mut it: io_iterator_t = MACH_PORT_NULL;
        // SAFETY: out-pointer is valid; plane string outlives the call.
        let ret = unsafe { IORegistryEntryGetChildIterator(self.0, c_plane.as_ptr(), &mut it) };
        if ret != KERN_SUCCESS {
            return Err(Status(ret));
        }
        Ok(IoKitIter(it))
    }

    fn string_property(&self, key: &str) -> Option<CompactString> {
        let c_key = CString::new(key).ok()?;
        let mut buf = [0 as c_char; INBAND_LEN];
        let mut len = buf.len() as u32;
        // SAFETY: buffer and length describe the same allocation.
        let ret = unsafe {
            IORegistryEntryGetProperty(self.0, c_key.as_ptr(), buf.as_mut_ptr(), &mut len)
        };
        if ret != KERN_SUCCESS {
            return None;
        }
        // SAFETY: inband string properties are nul-terminated.
        let cstr = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Some(CompactString::new(cstr.to_string_lossy()))
    }

    fn properties_text(&self) -> Result<String, Status> {
        let mut dict: CFMutableDictionaryRef = std::ptr::null_mut();
        // SAFETY: out-pointer valid; a null allocator means default.
        let ret = unsafe {
            IORegistryEntryCreateCFProperties(self.0, &mut dict, std::ptr::null(), 0)
        };
        if ret != KERN_SUCCESS {
            return Err(Status(ret));
        }

        // SAFETY: `dict` is a live property list we own.
        let xml = unsafe {
            CFPropertyListCreateData(
                std::ptr::null(),
                dict,
                K_CF_PROPERTY_LIST_XML_FORMAT_V1_0,
                0,
                std::ptr::null_mut(),
            )
        };
        let text = if xml.is_null() {
            Err(STATUS_ERROR)
        } else {
            // SAFETY: byte pointer and length come from the same CFData.
            let bytes = unsafe {
                std::slice::from_raw_parts(CFDataGetBytePtr(xml), CFDataGetLength(xml) as usize)
            };
            let text = String::from_utf8_lossy(bytes).into_owned();
            // SAFETY: `xml` follows the create rule.
            unsafe { CFRelease(xml) };
            Ok(text)
        };
        // SAFETY: `dict` follows the create rule.
        unsafe { CFRelease(dict as CFTypeRef) };
        text
    }

    fn set_string_property(&self, key: &str, value: &str) -> Status {
        let Some(cf_key) = cf_string_from(key) else {
            return STATUS_ERROR;
        };
        let Some(cf_value) = cf_string_from(value) else {
            // SAFETY: key was created above and is unreleased.
            unsafe { CFRelease(cf_key) };
            return STATUS_ERROR;
        };
        // SAFETY: keys/values arrays are one element each, matching
        // num_values; the type callbacks retain them.
        let dict = unsafe {
            CFDictionaryCreate(
                std::ptr::null(),
                &cf_key as *const _,
                &cf_value as *const _,
                1,
                &kCFTypeDictionaryKeyCallBacks,
                &kCFTypeDictionaryValueCallBacks,
            )
        };
        let status = if dict.is_null() {
            STATUS_ERROR
        } else {
            // SAFETY: dict is a live dictionary.
            let ret = unsafe { IORegistryEntrySetCFProperties(self.0, dict) };
            // SAFETY: create rule.
            unsafe { CFRelease(dict) };
            Status(ret)
        };
        // SAFETY: create rule for both strings.
        unsafe {
            CFRelease(cf_key);
            CFRelease(cf_value);
        }
        status
    }

    fn open(&self, type_code: u32) -> (Status, Option<IoKitConnection>) {
        let mut connect: io_connect_t = MACH_PORT_NULL;
        // SAFETY: out-pointer valid; the task port is our own.
        let ret = unsafe { IOServiceOpen(self.0, mach_task_self_, type_code, &mut connect) };
        let conn = if connect != MACH_PORT_NULL {
            Some(IoKitConnection(connect))
        } else {
            None
        };
        (Status(ret), conn)
    }
}

impl Registry for IoKitRegistry {
    type Entry = IoKitEntry;
    type PlaneIter = IoKitIter;

    fn root(&self) -> Result<IoKitEntry, Status> {
        // SAFETY: a null master port selects the default.
        let root = unsafe { IORegistryGetRootEntry(MACH_PORT_NULL) };
        if root == MACH_PORT_NULL {
            Err(STATUS_ERROR)
        } else {
            Ok(IoKitEntry(root))
        }
    }

    fn iter_plane(&self, plane: &str, recursive: bool) -> Result<IoKitIter, Status> {
        let c_plane = CString::new(plane).map_err(|_| STATUS_ERROR)?;
        let options = if recursive {
            K_IO_REGISTRY_ITERATE_RECURSIVELY
        } else {
            0
        };
        let mut it: io_iterator_t = MACH_PORT_NULL;
        // SAFETY: out-pointer valid; plane string outlives the call.
        let ret = unsafe {
            IORegistryCreateIterator(MACH_PORT_NULL, c_plane.as_ptr(), options, &mut it)
        };
        if ret != KERN_SUCCESS {
            return Err(Status(ret));
        }
        Ok(IoKitIter(it))
    }

    fn status_message(&self, status: Status) -> String {
        // SAFETY: mach_error_string returns a static string for any code.
        let cstr = unsafe { CStr::from_ptr(mach_error_string(status.0)) };
        cstr.to_string_lossy().into_owned()
    }

    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn superclass_of(&self, class: &str) -> Option<CompactString> {
        let cf_class = cf_string_from(class)?;
        // SAFETY: `cf_class` is live for the call.
        let superclass = unsafe { IOObjectCopySuperclassForClass(cf_class) };
        // SAFETY: create rule.
        unsafe { CFRelease(cf_class) };
        let result = cf_string_to_compact(superclass);
        if !superclass.is_null() {
            // SAFETY: copy rule.
            unsafe { CFRelease(superclass) };
        }
        result
    }
}
