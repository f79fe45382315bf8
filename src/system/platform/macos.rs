use libproc::libproc::file_info::ListFDs;
use libproc::libproc::proc_pid::{listpidinfo, pidinfo};
use libproc::libproc::task_info::TaskAllInfo;

use super::ProcessProbe;

pub struct Platform;

impl ProcessProbe for Platform {
    fn thread_count(pid: u32) -> Option<u32> {
        let info = pidinfo::<TaskAllInfo>(pid as i32, 0).ok()?;
        u32::try_from(info.ptinfo.pti_threadnum).ok()
    }

    fn fd_count(pid: u32) -> Option<u32> {
        let info = pidinfo::<TaskAllInfo>(pid as i32, 0).ok()?;
        let fds = listpidinfo::<ListFDs>(pid as i32, info.pbsd.pbi_nfiles as usize).ok()?;
        Some(fds.len() as u32)
    }

    fn thread_names(_pid: u32) -> Vec<String> {
        // Thread names are not exposed for other processes
        Vec::new()
    }

    fn fd_targets(pid: u32) -> Vec<String> {
        let Ok(info) = pidinfo::<TaskAllInfo>(pid as i32, 0) else {
            return Vec::new();
        };
        listpidinfo::<ListFDs>(pid as i32, info.pbsd.pbi_nfiles as usize)
            .map(|fds| {
                fds.iter()
                    .map(|fd| format!("fd {} (type {})", fd.proc_fd, fd.proc_fdtype))
                    .collect()
            })
            .unwrap_or_default()
    }
}
