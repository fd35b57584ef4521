use std::sync::LazyLock;

pub const SHIM_VERSION: &str = env!("CARGO_PKG_VERSION");

static FULL_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{} {} ({}/{})",
        env!("CARGO_PKG_NAME"),
        SHIM_VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
});

pub fn full_version() -> &'static str {
    FULL_VERSION.as_str()
}

#[cfg(test)]
mod test {
    use super::{SHIM_VERSION, full_version};

    #[test]
    fn full_version_is_stable() {
        assert!(!full_version().is_empty());
        assert_eq!(full_version(), full_version());
        assert!(full_version().starts_with("frpc-mobile-core "));
        assert!(full_version().contains(SHIM_VERSION));
    }
}
