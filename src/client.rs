use anyhow::{Context, Result};
use windows::core::{Interface, PCWSTR};
use windows::Win32::Globalization::{MultiByteToWideChar, CP_ACP, MULTI_BYTE_TO_WIDE_CHAR_FLAGS};
use windows::Win32::System::Diagnostics::Debug::Extensions::{
    DebugCreate, IDebugClient, IDebugClient5, IDebugControl4, DEBUG_OUTCTL_ALL_CLIENTS,
};

use crate::output::{Output, OutputMask};
use crate::text;

/// The pieces of the debugger engine the extension talks to.
#[derive(Clone)]
pub struct DebugClient {
    client: IDebugClient5,
    control: IDebugControl4,
}

impl DebugClient {
    /// Wraps the client the engine passes to an extension command.
    pub fn new(client: &IDebugClient) -> Result<Self> {
        let client = client.cast::<IDebugClient5>()?;
        let control = client.cast::<IDebugControl4>()?;

        Ok(Self { client, control })
    }

    /// Creates a fresh client, for entry points that are not handed one.
    pub fn create() -> Result<Self> {
        let client = unsafe { DebugCreate::<IDebugClient5>() }.context("DebugCreate failed")?;
        let control = client.cast::<IDebugControl4>()?;

        Ok(Self { client, control })
    }

    pub fn raw(&self) -> &IDebugClient5 {
        &self.client
    }
}

impl Output for DebugClient {
    fn write(&self, mask: OutputMask, text: &str) -> Result<()> {
        let wide = text::to_wide_nul(&text::format_safe(text));
        unsafe {
            self.control.ControlledOutputWide(
                DEBUG_OUTCTL_ALL_CLIENTS,
                mask.bits(),
                PCWSTR(wide.as_ptr()),
            )
        }
        .context("ControlledOutputWide failed")
    }
}

/// Converts engine-provided bytes through the active ANSI code page.
pub fn ansi_to_wide(raw: &[u8]) -> Option<Vec<u16>> {
    let flags = MULTI_BYTE_TO_WIDE_CHAR_FLAGS::default();
    let len = unsafe { MultiByteToWideChar(CP_ACP, flags, raw, None) };
    if len <= 0 {
        return None;
    }

    let mut wide = vec![0u16; len as usize];
    let written = unsafe { MultiByteToWideChar(CP_ACP, flags, raw, Some(&mut wide)) };
    if written <= 0 {
        return None;
    }
    wide.truncate(written as usize);
    Some(wide)
}
