use bitflags::bitflags;

bitflags! {
    /// Output classes understood by the debugger console. Values match the
    /// engine's `DEBUG_OUTPUT_*` masks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OutputMask: u32 {
        const NORMAL = 0x0000_0001;
        const ERROR = 0x0000_0002;
        const WARNING = 0x0000_0004;
        const VERBOSE = 0x0000_0008;
    }
}

/// Somewhere command output can be written to. The debugger console in
/// production, a recorder in tests.
pub trait Output {
    fn write(&self, mask: OutputMask, text: &str) -> anyhow::Result<()>;

    fn write_line(&self, mask: OutputMask, line: &str) -> anyhow::Result<()> {
        let mut line = line.to_owned();
        line.push('\n');
        self.write(mask, &line)
    }
}
