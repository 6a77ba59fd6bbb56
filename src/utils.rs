use crate::error::{BlastError, BlastResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    // Debian policy 5.6.1, plus an optional `:arch` qualifier.
    static ref PACKAGE_NAME: Regex =
        Regex::new(r"^[a-z0-9][a-z0-9+.\-]+(:[a-z0-9\-]+)?$").expect("static regex");
}

pub fn validate_package_name(name: &str) -> BlastResult<()> {
    if name.is_empty() {
        return Err(BlastError::InvalidPackageName(
            "Package name cannot be empty".into(),
        ));
    }
    if name.len() > 128 {
        return Err(BlastError::InvalidPackageName(
            "Package name too long (max 128 characters)".into(),
        ));
    }
    if !PACKAGE_NAME.is_match(name) {
        return Err(BlastError::InvalidPackageName(format!(
            "'{}' is not a valid Debian package name",
            name
        )));
    }
    Ok(())
}

/// Drops the `:arch` qualifier dpkg and apt append on multi-arch systems.
pub fn strip_arch(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

pub fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }
    format!("{:.1} {}", size, UNITS[unit_index])
}

pub fn format_duration_ms(millis: u64) -> String {
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        let seconds = millis / 1000;
        format!("{}m {}s", seconds / 60, seconds % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_package_name() {
        assert!(validate_package_name("nginx").is_ok());
        assert!(validate_package_name("libstdc++6").is_ok());
        assert!(validate_package_name("python3.11").is_ok());
        assert!(validate_package_name("libc6:amd64").is_ok());
        assert!(validate_package_name("").is_err());
        assert!(validate_package_name("a").is_err());
        assert!(validate_package_name("Nginx").is_err());
        assert!(validate_package_name("nginx; rm -rf /").is_err());
        assert!(validate_package_name("-y").is_err());
        assert!(validate_package_name("--purge").is_err());
    }

    #[test]
    fn test_strip_arch() {
        assert_eq!(strip_arch("libc6:amd64"), "libc6");
        assert_eq!(strip_arch("perl:any"), "perl");
        assert_eq!(strip_arch("bash"), "bash");
    }

    #[test]
    fn test_dedup_preserving_order() {
        let items = vec!["ssh".to_string(), "sshd".to_string(), "ssh".to_string()];
        assert_eq!(dedup_preserving_order(items), vec!["ssh", "sshd"]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(250), "250ms");
        assert_eq!(format_duration_ms(1500), "1.5s");
        assert_eq!(format_duration_ms(90_000), "1m 30s");
    }
}
