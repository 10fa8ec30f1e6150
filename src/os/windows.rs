// src/os/windows.rs

//! Win32 implementations: window operations, `ShellExecuteExW` launches and
//! the top-level window event hook.

use std::cell::RefCell;
use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{BOOL, CloseHandle, FALSE, HWND, LPARAM, TRUE};
use windows_sys::Win32::System::Threading::{GetCurrentThreadId, GetProcessId};
use windows_sys::Win32::UI::Accessibility::{HWINEVENTHOOK, SetWinEventHook, UnhookWinEvent};
use windows_sys::Win32::UI::Shell::{
    SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW, ShellExecuteExW,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, EVENT_OBJECT_CREATE, EVENT_OBJECT_DESTROY, EnumWindows, FindWindowW,
    GW_OWNER, GetMessageW, GetWindow, GetWindowThreadProcessId, IsWindowVisible, MSG,
    OBJID_WINDOW, PM_NOREMOVE, PeekMessageW, PostMessageW, PostThreadMessageW, SC_CLOSE,
    SMTO_ABORTIFHUNG, SW_HIDE, SW_MINIMIZE, SW_SHOWNORMAL, SendMessageTimeoutW, ShowWindow,
    TranslateMessage, WINEVENT_OUTOFCONTEXT, WINEVENT_SKIPOWNPROCESS, WM_CLOSE, WM_QUIT,
    WM_SYSCOMMAND, WM_USER,
};

use super::LaunchSpec;
use super::window::{RawWindowEvent, WindowError, WindowEventKind, WindowId, WindowOperator};

const SEND_CLOSE_TIMEOUT_MS: u32 = 2_000;

fn to_wide(value: &OsStr) -> Vec<u16> {
    value.encode_wide().chain(std::iter::once(0)).collect()
}

fn hwnd_of(window: WindowId) -> HWND {
    window as usize as HWND
}

struct MainWindowSearch {
    pid: u32,
    found: HWND,
}

unsafe extern "system" fn find_main_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = unsafe { &mut *(lparam as *mut MainWindowSearch) };
    let mut window_pid = 0u32;
    unsafe { GetWindowThreadProcessId(hwnd, &mut window_pid) };
    if window_pid != search.pid {
        return TRUE;
    }
    let unowned = unsafe { GetWindow(hwnd, GW_OWNER) }.is_null();
    let visible = unsafe { IsWindowVisible(hwnd) } != 0;
    if unowned && visible {
        search.found = hwnd;
        return FALSE;
    }
    TRUE
}

/// The visible, unowned top-level window of `pid`.
fn main_window(pid: u32) -> Result<HWND, WindowError> {
    let mut search = MainWindowSearch {
        pid,
        found: ptr::null_mut(),
    };
    // EnumWindows reports failure when the callback stops early; ignore it.
    unsafe { EnumWindows(Some(find_main_window), &mut search as *mut _ as LPARAM) };
    if search.found.is_null() {
        Err(WindowError::NoWindow(pid))
    } else {
        Ok(search.found)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Win32WindowOperator;

impl WindowOperator for Win32WindowOperator {
    fn minimize(&self, pid: u32) -> Result<(), WindowError> {
        let hwnd = main_window(pid)?;
        unsafe { ShowWindow(hwnd, SW_MINIMIZE) };
        Ok(())
    }

    fn close_main_window(&self, pid: u32) -> Result<(), WindowError> {
        let hwnd = main_window(pid)?;
        if unsafe { PostMessageW(hwnd, WM_CLOSE, 0, 0) } == 0 {
            return Err(WindowError::Failed(io::Error::last_os_error().to_string()));
        }
        Ok(())
    }

    fn post_close(&self, pid: u32) -> Result<(), WindowError> {
        let hwnd = main_window(pid)?;
        let mut result = 0usize;
        let sent = unsafe {
            SendMessageTimeoutW(
                hwnd,
                WM_SYSCOMMAND,
                SC_CLOSE as usize,
                0,
                SMTO_ABORTIFHUNG,
                SEND_CLOSE_TIMEOUT_MS,
                &mut result,
            )
        };
        if sent == 0 {
            return Err(WindowError::Failed(io::Error::last_os_error().to_string()));
        }
        Ok(())
    }

    fn find_visible(&self, title: &str) -> Option<WindowId> {
        let title = to_wide(OsStr::new(title));
        let hwnd = unsafe { FindWindowW(ptr::null(), title.as_ptr()) };
        if hwnd.is_null() || unsafe { IsWindowVisible(hwnd) } == 0 {
            return None;
        }
        Some(hwnd as usize as WindowId)
    }

    fn minimize_window(&self, window: WindowId) -> Result<(), WindowError> {
        unsafe { ShowWindow(hwnd_of(window), SW_MINIMIZE) };
        Ok(())
    }

    fn hide(&self, window: WindowId) -> Result<(), WindowError> {
        unsafe { ShowWindow(hwnd_of(window), SW_HIDE) };
        Ok(())
    }
}

/// Launch through the shell. `verb` is `Some("runas")` for an elevation
/// request; a hidden launch starts with its window hidden.
pub(crate) fn shell_execute(spec: &LaunchSpec, verb: Option<&str>) -> io::Result<Option<u32>> {
    let file = to_wide(spec.program.as_os_str());
    let params = to_wide(OsStr::new(&spec.arguments));
    let directory = spec.working_dir.as_deref().map(|d| to_wide(d.as_os_str()));
    let verb = verb.map(|v| to_wide(OsStr::new(v)));

    let mut info: SHELLEXECUTEINFOW = unsafe { std::mem::zeroed() };
    info.cbSize = std::mem::size_of::<SHELLEXECUTEINFOW>() as u32;
    info.fMask = SEE_MASK_NOCLOSEPROCESS;
    info.lpVerb = verb.as_ref().map_or(ptr::null(), |v| v.as_ptr());
    info.lpFile = file.as_ptr();
    info.lpParameters = params.as_ptr();
    info.lpDirectory = directory.as_ref().map_or(ptr::null(), |d| d.as_ptr());
    info.nShow = if spec.hidden { SW_HIDE } else { SW_SHOWNORMAL };

    if unsafe { ShellExecuteExW(&mut info) } == 0 {
        // ERROR_CANCELLED (1223) when the user dismisses the UAC prompt.
        return Err(io::Error::last_os_error());
    }

    if info.hProcess.is_null() {
        return Ok(None);
    }
    let pid = unsafe { GetProcessId(info.hProcess) };
    unsafe { CloseHandle(info.hProcess) };
    Ok((pid != 0).then_some(pid))
}

thread_local! {
    static EVENT_SINK: RefCell<Option<mpsc::Sender<RawWindowEvent>>> = const { RefCell::new(None) };
}

unsafe extern "system" fn on_window_event(
    _hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    id_object: i32,
    _id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    if id_object != OBJID_WINDOW || hwnd.is_null() {
        return;
    }
    let kind = match event {
        EVENT_OBJECT_CREATE => WindowEventKind::Created,
        EVENT_OBJECT_DESTROY => WindowEventKind::Destroyed,
        _ => return,
    };
    let mut pid = 0u32;
    unsafe { GetWindowThreadProcessId(hwnd, &mut pid) };

    EVENT_SINK.with(|sink| {
        if let Some(tx) = sink.borrow().as_ref() {
            // Never block the hook thread; a full queue drops the event.
            let _ = tx.try_send(RawWindowEvent { kind, pid });
        }
    });
}

/// Dedicated thread owning a `SetWinEventHook` registration and its message
/// pump. Raw events are forwarded over a bounded channel.
#[derive(Debug)]
pub struct WindowEventHook {
    thread_id: Arc<AtomicU32>,
    join: Option<JoinHandle<()>>,
}

impl WindowEventHook {
    pub fn spawn(tx: mpsc::Sender<RawWindowEvent>) -> io::Result<Self> {
        let thread_id = Arc::new(AtomicU32::new(0));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<io::Result<()>>();

        let tid = Arc::clone(&thread_id);
        let join = std::thread::Builder::new()
            .name("window-events".to_string())
            .spawn(move || pump(tx, tid, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                thread_id,
                join: Some(join),
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => Err(io::Error::other("window event thread exited during startup")),
        }
    }

    /// Unhook and join the pump thread.
    pub fn stop(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        let tid = self.thread_id.load(Ordering::SeqCst);
        if unsafe { PostThreadMessageW(tid, WM_QUIT, 0, 0) } == 0 {
            warn!(error = %io::Error::last_os_error(), "could not post quit to window event thread");
            return;
        }
        if join.join().is_err() {
            warn!("window event thread panicked");
        }
        debug!("window event hook stopped");
    }
}

impl Drop for WindowEventHook {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump(
    tx: mpsc::Sender<RawWindowEvent>,
    thread_id: Arc<AtomicU32>,
    ready: std::sync::mpsc::Sender<io::Result<()>>,
) {
    thread_id.store(unsafe { GetCurrentThreadId() }, Ordering::SeqCst);
    EVENT_SINK.with(|sink| *sink.borrow_mut() = Some(tx));

    let mut msg: MSG = unsafe { std::mem::zeroed() };
    // Force creation of this thread's message queue so WM_QUIT can be posted.
    unsafe { PeekMessageW(&mut msg, ptr::null_mut(), WM_USER, WM_USER, PM_NOREMOVE) };

    let hook = unsafe {
        SetWinEventHook(
            EVENT_OBJECT_CREATE,
            EVENT_OBJECT_DESTROY,
            ptr::null_mut(),
            Some(on_window_event),
            0,
            0,
            WINEVENT_OUTOFCONTEXT | WINEVENT_SKIPOWNPROCESS,
        )
    };
    if hook.is_null() {
        let _ = ready.send(Err(io::Error::last_os_error()));
        return;
    }
    let _ = ready.send(Ok(()));
    debug!("window event hook installed");

    loop {
        let got = unsafe { GetMessageW(&mut msg, ptr::null_mut(), 0, 0) };
        if got == 0 || got == -1 {
            break;
        }
        unsafe {
            TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }

    unsafe { UnhookWinEvent(hook) };
    EVENT_SINK.with(|sink| sink.borrow_mut().take());
}
