/// Build information captured at compile time by `build.rs`
pub struct BuildInfo;

impl BuildInfo {
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// YYYYMMDD.HHMMSS (UTC)
    pub fn build_timestamp() -> &'static str {
        env!("BUILD_TIMESTAMP")
    }

    pub fn git_hash() -> &'static str {
        env!("GIT_HASH")
    }

    pub fn git_hash_short() -> &'static str {
        env!("GIT_HASH_SHORT")
    }

    pub fn target_platform() -> &'static str {
        env!("TARGET_PLATFORM")
    }

    pub fn build_profile() -> &'static str {
        env!("BUILD_PROFILE")
    }

    /// version.timestamp
    pub fn build_string() -> &'static str {
        env!("BUILD_STRING")
    }

    /// Short form for the window title.
    pub fn display_version() -> String {
        format!("{} ({})", Self::version(), Self::git_hash_short())
    }

    /// Multi-line summary, logged at startup.
    pub fn detailed_info() -> String {
        format!(
            "Version: {}\nBuild: {}\nCommit: {}\nPlatform: {}\nProfile: {}",
            Self::build_string(),
            Self::build_timestamp(),
            Self::git_hash(),
            Self::target_platform(),
            Self::build_profile()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_string_starts_with_version() {
        assert!(BuildInfo::build_string().starts_with(BuildInfo::version()));
        assert!(BuildInfo::detailed_info().contains(BuildInfo::target_platform()));
    }
}
