//! DbgEng-backed engine implementation (Windows only).
//!
//! Hand-rolled COM bindings for the small slice of dbgeng.dll the server
//! uses: `DebugCreate`, `IDebugClient::{OpenDumpFile, EndSession,
//! SetOutputCallbacks}`, `IDebugControl::{Execute, WaitForEvent}`, and an
//! `IDebugOutputCallbacks` implementation that feeds the adapter's output
//! buffer. Vtable slot order matters; the placeholder arrays stand in for the
//! interface methods this server never calls.

use super::{DebugEngine, EngineAdapter, EngineError, EngineFactory, OutputBuffer};
use std::ffi::{c_char, c_void, CStr, CString, OsStr};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[allow(non_camel_case_types)]
type HRESULT = i32;

const S_OK: HRESULT = 0;
const E_NOINTERFACE: HRESULT = 0x8000_4002_u32 as HRESULT;

const DEBUG_OUTCTL_ALL_CLIENTS: u32 = 0x0000_0001;
const DEBUG_EXECUTE_DEFAULT: u32 = 0;
const DEBUG_END_PASSIVE: u32 = 0;
const WAIT_INFINITE: u32 = u32::MAX;
const COINIT_MULTITHREADED: u32 = 0;

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

const IID_IUNKNOWN: Guid = Guid {
    data1: 0x0000_0000,
    data2: 0x0000,
    data3: 0x0000,
    data4: [0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
};

// 27FE5639-8407-4F47-8364-EE118FB08AC8
const IID_IDEBUG_CLIENT: Guid = Guid {
    data1: 0x27fe_5639,
    data2: 0x8407,
    data3: 0x4f47,
    data4: [0x83, 0x64, 0xee, 0x11, 0x8f, 0xb0, 0x8a, 0xc8],
};

// 5182E668-105E-416E-AD92-24EF800424BA
const IID_IDEBUG_CONTROL: Guid = Guid {
    data1: 0x5182_e668,
    data2: 0x105e,
    data3: 0x416e,
    data4: [0xad, 0x92, 0x24, 0xef, 0x80, 0x04, 0x24, 0xba],
};

// 4BF58045-D654-4C40-B0AF-683090F356DC
const IID_IDEBUG_OUTPUT_CALLBACKS: Guid = Guid {
    data1: 0x4bf5_8045,
    data2: 0xd654,
    data3: 0x4c40,
    data4: [0xb0, 0xaf, 0x68, 0x30, 0x90, 0xf3, 0x56, 0xdc],
};

#[link(name = "dbgeng")]
extern "system" {
    fn DebugCreate(interface_id: *const Guid, interface: *mut *mut c_void) -> HRESULT;
}

#[link(name = "kernel32")]
extern "system" {
    fn SetDllDirectoryW(path: *const u16) -> i32;
    fn AddDllDirectory(new_directory: *const u16) -> *mut c_void;
    fn LoadLibraryW(file_name: *const u16) -> *mut c_void;
    fn GetModuleHandleW(module_name: *const u16) -> *mut c_void;
    fn GetModuleFileNameW(module: *mut c_void, file_name: *mut u16, size: u32) -> u32;
    fn GetLastError() -> u32;
    fn FormatMessageW(
        flags: u32,
        source: *const c_void,
        message_id: u32,
        language_id: u32,
        buffer: *mut u16,
        size: u32,
        arguments: *const c_void,
    ) -> u32;
    fn LocalFree(mem: *mut c_void) -> *mut c_void;
}

#[link(name = "ole32")]
extern "system" {
    fn CoInitializeEx(reserved: *mut c_void, coinit: u32) -> HRESULT;
}

#[repr(C)]
struct IUnknownVtbl {
    query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HRESULT,
    add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    release: unsafe extern "system" fn(*mut c_void) -> u32,
}

#[repr(C)]
struct IDebugClientVtbl {
    _iunknown: [usize; 3],
    // AttachKernel .. SetProcessOptions
    _attach_kernel_to_set_process_options: [usize; 16],
    open_dump_file: unsafe extern "system" fn(*mut c_void, *const c_char) -> HRESULT,
    // WriteDumpFile .. DetachProcesses
    _write_dump_file_to_detach_processes: [usize; 6],
    end_session: unsafe extern "system" fn(*mut c_void, u32) -> HRESULT,
    // GetExitCode .. GetOutputCallbacks
    _get_exit_code_to_get_output_callbacks: [usize; 7],
    set_output_callbacks: unsafe extern "system" fn(*mut c_void, *mut c_void) -> HRESULT,
}

#[repr(C)]
struct IDebugControlVtbl {
    _iunknown: [usize; 3],
    // GetInterrupt .. the 63 methods preceding Execute
    _before_execute: [usize; 63],
    execute: unsafe extern "system" fn(*mut c_void, u32, *const c_char, u32) -> HRESULT,
    // ExecuteCommandFile .. the 26 methods preceding WaitForEvent
    _before_wait_for_event: [usize; 26],
    wait_for_event: unsafe extern "system" fn(*mut c_void, u32, u32) -> HRESULT,
}

#[repr(C)]
struct IDebugOutputCallbacksVtbl {
    query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HRESULT,
    add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    release: unsafe extern "system" fn(*mut c_void) -> u32,
    output: unsafe extern "system" fn(*mut c_void, u32, *const c_char) -> HRESULT,
}

/// Reinterpret a COM interface pointer as a reference to its vtable.
///
/// # Safety
/// `ptr` must be a live COM interface pointer whose vtable layout starts with
/// (or is) `T`.
unsafe fn vtbl<'a, T>(ptr: *mut c_void) -> &'a T {
    &**(ptr as *mut *const T)
}

/// Owned COM interface reference, released on drop.
struct ComPtr(*mut c_void);

impl ComPtr {
    fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

impl Drop for ComPtr {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: every COM vtable begins with the IUnknown methods and we
            // own one reference on this pointer.
            unsafe {
                let vt: &IUnknownVtbl = vtbl(self.0);
                (vt.release)(self.0);
            }
        }
    }
}

fn check_hr(hr: HRESULT, call: &'static str) -> Result<(), EngineError> {
    if hr >= 0 {
        return Ok(());
    }
    let message =
        system_message(hr as u32).unwrap_or_else(|| format!("HRESULT {hr:#010x}"));
    error!(call, hr, message = %message, "engine call failed");
    Err(EngineError::new(call, message))
}

/// Translate a Windows error/HRESULT code to its system message text.
fn system_message(code: u32) -> Option<String> {
    const FORMAT_MESSAGE_ALLOCATE_BUFFER: u32 = 0x0000_0100;
    const FORMAT_MESSAGE_FROM_SYSTEM: u32 = 0x0000_1000;
    const FORMAT_MESSAGE_IGNORE_INSERTS: u32 = 0x0000_0200;

    let mut buf: *mut u16 = ptr::null_mut();
    // SAFETY: with FORMAT_MESSAGE_ALLOCATE_BUFFER the buffer argument is a
    // pointer to a pointer the system allocates; it is freed with LocalFree.
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_ALLOCATE_BUFFER | FORMAT_MESSAGE_FROM_SYSTEM
                | FORMAT_MESSAGE_IGNORE_INSERTS,
            ptr::null(),
            code,
            0,
            &mut buf as *mut *mut u16 as *mut u16,
            0,
            ptr::null(),
        )
    };
    if len == 0 || buf.is_null() {
        return None;
    }
    // SAFETY: FormatMessageW wrote `len` UTF-16 units at `buf`.
    let message = unsafe {
        let text = String::from_utf16_lossy(std::slice::from_raw_parts(buf, len as usize));
        LocalFree(buf as *mut c_void);
        text
    };
    let message = message.trim_end_matches(['\r', '\n']).to_string();
    if message.is_empty() {
        None
    } else {
        Some(message)
    }
}

fn last_error_message() -> String {
    // SAFETY: trivially safe thread-local read.
    let code = unsafe { GetLastError() };
    system_message(code).unwrap_or_else(|| format!("Win32 error {code}"))
}

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

fn ansi(text: &str, call: &'static str) -> Result<CString, EngineError> {
    CString::new(text).map_err(|_| EngineError::new(call, "argument contains a NUL byte"))
}

/// COM object implementing IDebugOutputCallbacks over the shared buffer.
#[repr(C)]
struct OutputCallbacks {
    vtbl: *const IDebugOutputCallbacksVtbl,
    refs: AtomicU32,
    sink: Arc<OutputBuffer>,
}

static OUTPUT_CALLBACKS_VTBL: IDebugOutputCallbacksVtbl = IDebugOutputCallbacksVtbl {
    query_interface: callbacks_query_interface,
    add_ref: callbacks_add_ref,
    release: callbacks_release,
    output: callbacks_output,
};

impl OutputCallbacks {
    /// Heap-allocate a callbacks object carrying one owned reference.
    fn new(sink: Arc<OutputBuffer>) -> *mut c_void {
        Box::into_raw(Box::new(OutputCallbacks {
            vtbl: &OUTPUT_CALLBACKS_VTBL,
            refs: AtomicU32::new(1),
            sink,
        })) as *mut c_void
    }
}

unsafe extern "system" fn callbacks_query_interface(
    this: *mut c_void,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> HRESULT {
    if riid.is_null() || out.is_null() {
        return E_NOINTERFACE;
    }
    if *riid == IID_IUNKNOWN || *riid == IID_IDEBUG_OUTPUT_CALLBACKS {
        callbacks_add_ref(this);
        *out = this;
        S_OK
    } else {
        *out = ptr::null_mut();
        E_NOINTERFACE
    }
}

unsafe extern "system" fn callbacks_add_ref(this: *mut c_void) -> u32 {
    let obj = &*(this as *mut OutputCallbacks);
    obj.refs.fetch_add(1, Ordering::AcqRel) + 1
}

unsafe extern "system" fn callbacks_release(this: *mut c_void) -> u32 {
    let remaining = {
        let obj = &*(this as *mut OutputCallbacks);
        obj.refs.fetch_sub(1, Ordering::AcqRel) - 1
    };
    if remaining == 0 {
        drop(Box::from_raw(this as *mut OutputCallbacks));
    }
    remaining
}

/// Invoked by the engine, possibly from a different thread than the in-flight
/// call; only the buffer's own lock is taken here.
unsafe extern "system" fn callbacks_output(
    this: *mut c_void,
    _mask: u32,
    text: *const c_char,
) -> HRESULT {
    if !text.is_null() {
        let obj = &*(this as *mut OutputCallbacks);
        obj.sink.append(&CStr::from_ptr(text).to_string_lossy());
    }
    S_OK
}

/// One DbgEng instance: an IDebugClient plus the IDebugControl view of it.
pub(crate) struct DbgEngine {
    client: ComPtr,
    control: ComPtr,
}

// SAFETY: COM is initialized for the multithreaded apartment and the owning
// adapter serializes every call, so the interface pointers never see
// concurrent use even when the adapter migrates across threads.
unsafe impl Send for DbgEngine {}

impl DebugEngine for DbgEngine {
    fn open_dump_file(&mut self, path: &Path) -> Result<(), EngineError> {
        let path = ansi(&path.to_string_lossy(), "OpenDumpFile")?;
        // SAFETY: `client` is a live IDebugClient and `path` outlives the call.
        let hr = unsafe {
            let vt: &IDebugClientVtbl = vtbl(self.client.as_ptr());
            (vt.open_dump_file)(self.client.as_ptr(), path.as_ptr())
        };
        check_hr(hr, "OpenDumpFile")
    }

    fn wait_for_event(&mut self) -> Result<(), EngineError> {
        // SAFETY: `control` is a live IDebugControl.
        let hr = unsafe {
            let vt: &IDebugControlVtbl = vtbl(self.control.as_ptr());
            (vt.wait_for_event)(self.control.as_ptr(), 0, WAIT_INFINITE)
        };
        check_hr(hr, "WaitForEvent")
    }

    fn execute(&mut self, command: &str) -> Result<(), EngineError> {
        let command = ansi(command, "Execute")?;
        // SAFETY: `control` is a live IDebugControl and `command` outlives the
        // call; output lands in the callbacks object before Execute returns.
        let hr = unsafe {
            let vt: &IDebugControlVtbl = vtbl(self.control.as_ptr());
            (vt.execute)(
                self.control.as_ptr(),
                DEBUG_OUTCTL_ALL_CLIENTS,
                command.as_ptr(),
                DEBUG_EXECUTE_DEFAULT,
            )
        };
        check_hr(hr, "Execute")
    }

    fn end_session(&mut self) -> Result<(), EngineError> {
        // SAFETY: `client` is a live IDebugClient.
        let hr = unsafe {
            let vt: &IDebugClientVtbl = vtbl(self.client.as_ptr());
            (vt.end_session)(self.client.as_ptr(), DEBUG_END_PASSIVE)
        };
        check_hr(hr, "EndSession")
    }
}

/// Creates adapters bound to fresh DbgEng instances.
#[derive(Default)]
pub struct DbgEngFactory;

impl DbgEngFactory {
    pub fn new() -> Self {
        Self
    }
}

impl EngineFactory for DbgEngFactory {
    fn create(&self) -> Result<EngineAdapter, EngineError> {
        let mut raw: *mut c_void = ptr::null_mut();
        // SAFETY: DebugCreate writes a referenced IDebugClient on success.
        let hr = unsafe { DebugCreate(&IID_IDEBUG_CLIENT, &mut raw) };
        check_hr(hr, "DebugCreate")?;
        let client = ComPtr(raw);

        let mut control_raw: *mut c_void = ptr::null_mut();
        // SAFETY: `client` is live; QueryInterface returns a referenced
        // IDebugControl for the same underlying object.
        let hr = unsafe {
            let vt: &IUnknownVtbl = vtbl(client.as_ptr());
            (vt.query_interface)(client.as_ptr(), &IID_IDEBUG_CONTROL, &mut control_raw)
        };
        check_hr(hr, "QueryInterface(IDebugControl)")?;
        let control = ComPtr(control_raw);

        let sink = Arc::new(OutputBuffer::default());
        let callbacks = OutputCallbacks::new(sink.clone());
        // SAFETY: `callbacks` is a valid IDebugOutputCallbacks carrying one
        // owned reference. The engine takes its own reference on success;
        // releasing ours afterwards either hands ownership over or frees the
        // object when registration failed.
        let hr = unsafe {
            let vt: &IDebugClientVtbl = vtbl(client.as_ptr());
            let hr = (vt.set_output_callbacks)(client.as_ptr(), callbacks);
            callbacks_release(callbacks);
            hr
        };
        check_hr(hr, "SetOutputCallbacks")?;

        Ok(EngineAdapter::new(
            Box::new(DbgEngine { client, control }),
            sink,
        ))
    }
}

/// One-time process setup: initialize COM for the multithreaded apartment and
/// (optionally) pin DLL resolution to a specific debugger installation.
pub fn bootstrap(debugger_dir: Option<&Path>) -> Result<(), EngineError> {
    // SAFETY: process-wide initialization with valid arguments; S_FALSE for an
    // already-initialized apartment passes the success check.
    let hr = unsafe { CoInitializeEx(ptr::null_mut(), COINIT_MULTITHREADED) };
    check_hr(hr, "CoInitializeEx")?;

    let Some(dir) = debugger_dir else {
        return Ok(());
    };

    let dir_w = wide(dir.as_os_str());
    // SAFETY: `dir_w` is a NUL-terminated UTF-16 string.
    if unsafe { SetDllDirectoryW(dir_w.as_ptr()) } == 0 {
        let message = last_error_message();
        error!(directory = %dir.display(), message = %message, "Failed to set dll directory");
        return Err(EngineError::new("SetDllDirectoryW", message));
    }

    let ttd = dir.join("ttd");
    let ttd_w = wide(ttd.as_os_str());
    // SAFETY: `ttd_w` is a NUL-terminated UTF-16 string.
    if unsafe { AddDllDirectory(ttd_w.as_ptr()) }.is_null() {
        warn!(
            directory = %ttd.display(),
            message = %last_error_message(),
            "Failed to add ttd dll directory, ttd commands may not work"
        );
    }

    let dll = dir.join("dbgeng.dll");
    let dll_w = wide(dll.as_os_str());
    // SAFETY: `dll_w` is a NUL-terminated UTF-16 string.
    if unsafe { LoadLibraryW(dll_w.as_ptr()) }.is_null() {
        let message = last_error_message();
        error!(path = %dll.display(), message = %message, "Failed to load dbgeng dll");
        return Err(EngineError::new("LoadLibraryW", message));
    }

    log_loaded_module();
    Ok(())
}

fn log_loaded_module() {
    let name = wide(OsStr::new("dbgeng.dll"));
    // SAFETY: querying an already-loaded module with a valid name and buffer.
    unsafe {
        let handle = GetModuleHandleW(name.as_ptr());
        if handle.is_null() {
            return;
        }
        let mut buf = [0u16; 260];
        let len = GetModuleFileNameW(handle, buf.as_mut_ptr(), buf.len() as u32);
        if len > 0 {
            let path = String::from_utf16_lossy(&buf[..len as usize]);
            info!(dll = "dbgeng.dll", file_name = %path, "loaded");
        }
    }
}
