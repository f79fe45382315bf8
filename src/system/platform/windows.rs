use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
};
use windows_sys::Win32::System::Threading::{
    GetProcessHandleCount, OpenProcess, PROCESS_QUERY_INFORMATION,
};

use super::ProcessProbe;

pub struct Platform;

impl ProcessProbe for Platform {
    fn thread_count(pid: u32) -> Option<u32> {
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0);
            if snapshot == INVALID_HANDLE_VALUE {
                return None;
            }
            let mut entry = std::mem::zeroed::<THREADENTRY32>();
            entry.dwSize = std::mem::size_of::<THREADENTRY32>() as u32;
            let mut count = 0;
            let mut more = Thread32First(snapshot, &mut entry) != 0;
            while more {
                if entry.th32OwnerProcessID == pid {
                    count += 1;
                }
                more = Thread32Next(snapshot, &mut entry) != 0;
            }
            CloseHandle(snapshot);
            Some(count)
        }
    }

    // Handles stand in for file descriptors
    fn fd_count(pid: u32) -> Option<u32> {
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_INFORMATION, 0, pid);
            if handle.is_null() {
                return None;
            }
            let mut count = 0u32;
            let ok = GetProcessHandleCount(handle, &mut count);
            CloseHandle(handle);
            if ok == 0 { None } else { Some(count) }
        }
    }

    fn thread_names(_pid: u32) -> Vec<String> {
        Vec::new()
    }

    fn fd_targets(_pid: u32) -> Vec<String> {
        Vec::new()
    }
}
