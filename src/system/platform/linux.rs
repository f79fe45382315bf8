use std::fs;

use super::ProcessProbe;

pub struct Platform;

fn count_entries(path: &str) -> Option<u32> {
    let entries = fs::read_dir(path).ok()?;
    Some(entries.filter(|e| e.is_ok()).count() as u32)
}

impl ProcessProbe for Platform {
    fn thread_count(pid: u32) -> Option<u32> {
        // One directory per thread under /proc/{pid}/task
        count_entries(&format!("/proc/{pid}/task"))
    }

    fn fd_count(pid: u32) -> Option<u32> {
        count_entries(&format!("/proc/{pid}/fd"))
    }

    fn thread_names(pid: u32) -> Vec<String> {
        let Ok(tasks) = fs::read_dir(format!("/proc/{pid}/task")) else {
            return Vec::new();
        };
        tasks
            .flatten()
            .filter_map(|task| {
                // comm holds the thread name followed by a newline
                let comm = fs::read_to_string(task.path().join("comm")).ok()?;
                Some(comm.trim_end().to_string())
            })
            .collect()
    }

    fn fd_targets(pid: u32) -> Vec<String> {
        let Ok(fds) = fs::read_dir(format!("/proc/{pid}/fd")) else {
            return Vec::new();
        };
        fds.flatten()
            .filter_map(|fd| fs::read_link(fd.path()).ok())
            .map(|target| target.to_string_lossy().into_owned())
            .collect()
    }
}
