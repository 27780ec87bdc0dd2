/// Writes formatted text to anything implementing [`crate::output::Output`],
/// typically a [`crate::client::DebugClient`].
#[macro_export]
macro_rules! dlog {
    ($client:expr, $($arg:tt)*) => {{
        use $crate::output::Output as _;
        $client.write($crate::output::OutputMask::NORMAL, &format!($($arg)*))
    }};
}

#[macro_export]
macro_rules! dlogln {
    ($client:expr, $($arg:tt)*) => {{
        use $crate::output::Output as _;
        $client.write_line($crate::output::OutputMask::NORMAL, &format!($($arg)*))
    }};
}

/// Like [`dlogln!`] but on the error channel, which the debugger highlights.
#[macro_export]
macro_rules! derrln {
    ($client:expr, $($arg:tt)*) => {{
        use $crate::output::Output as _;
        $client.write_line($crate::output::OutputMask::ERROR, &format!($($arg)*))
    }};
}

/// Exports `$cmd` as the DbgEng extension command `$name`.
///
/// `$cmd` has the shape `fn(&DebugClient, String) -> anyhow::Result<()>` and
/// receives the raw argument string, decoded from the ANSI code page. An `Err`
/// is printed on the error channel and turned into `E_ABORT`.
#[macro_export]
macro_rules! export_cmd {
    ($name:ident, $cmd:path) => {
        #[no_mangle]
        pub extern "system" fn $name(
            raw_client: *mut ::core::ffi::c_void,
            args: ::windows::core::PCSTR,
        ) -> ::windows::core::HRESULT {
            use ::windows::core::Interface as _;
            use ::windows::Win32::Foundation::{E_ABORT, E_INVALIDARG, S_OK};
            use ::windows::Win32::System::Diagnostics::Debug::Extensions::IDebugClient;

            let Some(raw_client) = (unsafe { IDebugClient::from_raw_borrowed(&raw_client) }) else {
                return E_INVALIDARG;
            };
            let Ok(client) = $crate::client::DebugClient::new(raw_client) else {
                return E_ABORT;
            };

            let args = if args.is_null() {
                String::new()
            } else {
                $crate::text::decode_args(unsafe { args.as_bytes() }, $crate::client::ansi_to_wide)
            };

            match $cmd(&client, args) {
                Ok(()) => S_OK,
                Err(e) => {
                    let _ = $crate::derrln!(client, "{}: {e}", stringify!($name));
                    E_ABORT
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::output::recorder::Recorder;
    use crate::output::OutputMask;

    #[test]
    fn log_macros_pick_the_channel() {
        let out = Recorder::default();
        crate::dlog!(out, "msos {}", 1).unwrap();
        crate::dlogln!(&out, " loaded").unwrap();
        crate::derrln!(out, "msos: {}", "failed").unwrap();

        assert_eq!(out.text(), "msos 1 loaded\nmsos: failed\n");
        assert_eq!(
            out.masks(),
            vec![OutputMask::NORMAL, OutputMask::NORMAL, OutputMask::ERROR]
        );
    }
}
