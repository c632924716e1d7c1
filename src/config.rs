/// Immutable settings shared by every merge job of one invocation.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// each page takes the natural size of its image
    pub free: bool,
    /// named page size, only consulted when width/height are unset
    pub size: String,
    pub landscape: bool,
    /// explicit page width in points, 0 when unset
    pub width: f64,
    /// explicit page height in points, 0 when unset
    pub height: f64,
    /// worker threads for batch jobs; 1 keeps them sequential
    pub threads: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            free: false,
            size: "A4".to_string(),
            landscape: false,
            width: 0.0,
            height: 0.0,
            threads: 1,
        }
    }
}

impl MergeConfig {
    pub fn has_explicit_size(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}
