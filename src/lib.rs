//! WinDbg extension exposing `!msos`, which hands its argument string to the
//! msos engine and prints what comes back.
//!
//! The engine is an `IMsos` COM object created by a factory exported from a
//! separately built library. See [`config::ShimConfig`] for how it is located.

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod foreign;
pub mod loader;
pub mod output;
pub mod shim;
pub mod text;

#[cfg(windows)]
pub mod client;
#[cfg(windows)]
pub mod com;

#[cfg(windows)]
mod extension {
    use windows::core::HRESULT;
    use windows::Win32::Foundation::S_OK;

    use crate::client::DebugClient;
    use crate::com::ComFactory;
    use crate::shim::{Shim, SharedShim};

    static MSOS: SharedShim<ComFactory> = SharedShim::new();

    #[export_name = "DebugExtensionInitialize"]
    extern "system" fn initialize(version: *mut u32, flags: *mut u32) -> HRESULT {
        unsafe {
            *version = 0x0001_0000;
            *flags = 0x00000000;
        }

        // The engine itself is created on first use.
        if let Ok(client) = DebugClient::create() {
            let _ = crate::dlogln!(client, "msos extension loaded");
        }
        S_OK
    }

    #[export_name = "DebugExtensionUninitialize"]
    extern "system" fn uninitialize() {
        if MSOS.release() {
            tracing::debug!("msos engine released");
        }
    }

    pub fn run_msos(client: &DebugClient, args: String) -> anyhow::Result<()> {
        MSOS.run(|| Shim::new(ComFactory), client, client, &args)
    }
}

#[cfg(windows)]
export_cmd!(msos, extension::run_msos);
