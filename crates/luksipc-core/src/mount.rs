//! Mount-table lookup used as a precondition check: refuse to touch a
//! device that's currently mounted, by path match or, for non-pseudo
//! entries, by device major/minor via `stat`.

use std::os::unix::fs::MetadataExt;

/// Returns `true` if `block_device` appears to be mounted, either because
/// `/proc/mounts` names it directly or because some other entry's device
/// shares its major/minor number (catches symlinks and bind-mounted
/// aliases). If the device itself can't be `stat`-ed, this conservatively
/// assumes it is mounted.
pub fn is_block_device_mounted(block_device: &str) -> bool {
    let block_dev_meta = match std::fs::metadata(block_device) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::error!(
                block_device,
                error = %e,
                "unable to stat device to determine if it's mounted, assuming it is for safety"
            );
            return true;
        }
    };
    let block_rdev = block_dev_meta.rdev();

    let Ok(contents) = std::fs::read_to_string("/proc/mounts") else {
        tracing::error!("unable to read /proc/mounts, assuming device is mounted for safety");
        return true;
    };

    for line in contents.lines() {
        let Some(entry) = parse_mount_line(line) else {
            continue;
        };

        if entry.fsname == block_device {
            tracing::debug!(block_device, mountpoint = %entry.mountpoint, "device mounted (name match)");
            return true;
        }

        if entry.fsname != "none" {
            if let Ok(meta) = std::fs::metadata(&entry.fsname) {
                if meta.rdev() == block_rdev {
                    tracing::debug!(
                        block_device,
                        other = %entry.fsname,
                        mountpoint = %entry.mountpoint,
                        "device mounted (major/minor match)"
                    );
                    return true;
                }
            }
        }
    }

    false
}

struct MountEntry {
    fsname: String,
    mountpoint: String,
}

fn parse_mount_line(line: &str) -> Option<MountEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    Some(MountEntry {
        fsname: parts[0].to_string(),
        mountpoint: unescape_mount_path(parts[1]),
    })
}

/// `/proc/mounts` escapes space/tab/newline/backslash as three-digit octal.
fn unescape_mount_path(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            let mut octal = String::with_capacity(3);
            for _ in 0..3 {
                if let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() && next < '8' {
                        octal.push(chars.next().unwrap());
                    } else {
                        break;
                    }
                }
            }
            if octal.len() == 3 {
                if let Ok(code) = u8::from_str_radix(&octal, 8) {
                    result.push(code as char);
                    continue;
                }
            }
            result.push('\\');
            result.push_str(&octal);
        } else {
            result.push(c);
        }
    }
    result
}
