//! Inspect command implementation

use anyhow::{Context, Result};
use taskns_core::ProcessId;
use taskns_namespace::NamespaceInfo;

pub fn execute(pid: Option<i32>) -> Result<()> {
    let target = pid.map_or_else(ProcessId::current, ProcessId::from_raw);

    println!("Namespace information for PID {target}");
    println!("{:-<60}", "");

    let info = NamespaceInfo::for_pid(target)
        .with_context(|| format!("Failed to get namespace information for PID {target}"))?;

    print!("{info}");

    match info.is_isolated() {
        Ok(true) => println!("\nProcess is in isolated namespaces"),
        Ok(false) => println!("\nProcess is in host namespaces"),
        Err(e) => println!("\nFailed to check isolation: {e}"),
    }

    Ok(())
}
