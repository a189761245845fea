//! Platform-specific shared-library file names.

/// Host operating-system family, as far as library naming is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// `profilers.dll`
    Windows,
    /// `libprofilers.dylib`
    MacOs,
    /// `libprofilers.so`, used for Linux and the other ELF unixes.
    Linux,
}

impl Platform {
    /// Platform the host was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    /// File-name prefix conventionally given to shared libraries.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Windows => "",
            Self::MacOs | Self::Linux => "lib",
        }
    }

    /// File-name suffix conventionally given to shared libraries.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Windows => ".dll",
            Self::MacOs => ".dylib",
            Self::Linux => ".so",
        }
    }

    /// Name of the canonical bundled library, e.g. `libprofilers.so`.
    #[must_use]
    pub fn library_file_name(self, base_name: &str) -> String {
        format!("{}{base_name}{}", self.prefix(), self.suffix())
    }

    /// Name of a staged copy, e.g. `libprofilers-1.4.0.so`.
    #[must_use]
    pub fn versioned_file_name(self, base_name: &str, version: &str) -> String {
        format!("{}{base_name}-{version}{}", self.prefix(), self.suffix())
    }
}
