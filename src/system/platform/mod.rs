pub trait ProcessProbe {
    fn thread_count(pid: u32) -> Option<u32>;
    fn fd_count(pid: u32) -> Option<u32>;
    fn thread_names(pid: u32) -> Vec<String>;
    fn fd_targets(pid: u32) -> Vec<String>;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(target_os = "macos")]
use macos as platform_impl;
#[cfg(target_os = "windows")]
use windows as platform_impl;

pub fn thread_count(pid: u32) -> Option<u32> {
    platform_impl::Platform::thread_count(pid)
}

pub fn fd_count(pid: u32) -> Option<u32> {
    platform_impl::Platform::fd_count(pid)
}

pub fn thread_names(pid: u32) -> Vec<String> {
    platform_impl::Platform::thread_names(pid)
}

pub fn fd_targets(pid: u32) -> Vec<String> {
    platform_impl::Platform::fd_targets(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrappers_do_not_panic_for_current_pid() {
        let pid = std::process::id();
        let _ = thread_count(pid);
        let _ = fd_count(pid);
        let _ = thread_names(pid);
        let _ = fd_targets(pid);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_process_has_threads_and_fds() {
        let pid = std::process::id();
        assert!(thread_count(pid).unwrap_or(0) >= 1);
        assert!(fd_count(pid).unwrap_or(0) >= 1);
        assert!(!thread_names(pid).is_empty());
    }
}
