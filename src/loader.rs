use std::path::{Path, PathBuf};

use libloading::Library;

use crate::error::{Result, ShimError};

/// A library opened to reach its factory export.
pub struct FactoryLibrary {
    library: Library,
    path: PathBuf,
}

impl FactoryLibrary {
    pub fn open(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading msos library");
        let library = unsafe { Library::new(path) }.map_err(|e| ShimError::LibraryLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            library,
            path: path.to_path_buf(),
        })
    }

    /// Resolves `symbol` to a value of type `T`, normally a function pointer.
    ///
    /// # Safety
    ///
    /// `T` must match the real type of the export, and the returned value must
    /// not outlive the library. Call [`FactoryLibrary::pin`] to make it live for
    /// the rest of the process.
    pub unsafe fn entry_point<T: Copy>(&self, symbol: &str) -> Result<T> {
        let mut name = symbol.as_bytes().to_vec();
        name.push(0);
        let export = self
            .library
            .get::<T>(&name)
            .map_err(|e| ShimError::EntryPoint {
                path: self.path.clone(),
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;
        Ok(*export)
    }

    /// Keeps the library mapped until the process exits. The msos engine hosts
    /// a managed runtime, which cannot be torn down and loaded again.
    pub fn pin(self) {
        tracing::debug!(path = %self.path.display(), "pinning msos library");
        std::mem::forget(self.library);
    }
}
