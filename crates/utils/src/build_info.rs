/// Git metadata captured by the build script, when the tree was a git checkout.
pub(crate) struct BuildInfo {
    pub commit_sha1: Option<&'static str>,
    git_dirty: Option<&'static str>,
}

impl BuildInfo {
    pub fn is_dirty(&self) -> bool {
        self.git_dirty == Some("true")
    }
}

pub(crate) const BUILD_INFO: BuildInfo = BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    git_dirty: option_env!("VERGEN_GIT_DIRTY"),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_flag_follows_the_git_status() {
        let info = |dirty| BuildInfo {
            commit_sha1: Some("abc123"),
            git_dirty: dirty,
        };

        assert!(info(Some("true")).is_dirty());
        assert!(!info(Some("false")).is_dirty());
        assert!(!info(None).is_dirty());
    }
}
