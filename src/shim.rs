//! The `msos` command body and the lazily created engine handle behind it.

use parking_lot::Mutex;

use crate::config::ShimConfig;
use crate::error::{Result, ShimError};
use crate::foreign::{ForeignObject, ObjectFactory};
use crate::output::{Output, OutputMask};

/// Where the engine handle stands. Only moves forward: once `Ready` or
/// `Failed`, it stays that way until the shim is dropped.
#[derive(Debug)]
pub enum HandleState<'a> {
    Uninitialized,
    Failed(&'a ShimError),
    Ready,
}

impl HandleState<'_> {
    pub fn is_ready(&self) -> bool {
        matches!(self, HandleState::Ready)
    }
}

type Handle = Result<Box<dyn ForeignObject + Send>>;

pub struct Shim<F> {
    factory: F,
    config: fn() -> Result<ShimConfig>,
    handle: Option<Handle>,
}

impl<F: ObjectFactory> Shim<F> {
    pub fn new(factory: F) -> Self {
        Self::with_config(factory, ShimConfig::load)
    }

    pub fn with_config(factory: F, config: fn() -> Result<ShimConfig>) -> Self {
        Self {
            factory,
            config,
            handle: None,
        }
    }

    pub fn state(&self) -> HandleState<'_> {
        match &self.handle {
            None => HandleState::Uninitialized,
            Some(Err(e)) => HandleState::Failed(e),
            Some(Ok(_)) => HandleState::Ready,
        }
    }

    /// Runs the bootstrap the first time it is called and hands back the engine.
    /// Later calls return the stored engine or the stored failure.
    pub fn acquire(&mut self, host: &F::Host) -> Result<&dyn ForeignObject> {
        let Self {
            factory,
            config,
            handle,
        } = self;

        match handle.get_or_insert_with(|| bootstrap(factory, *config, host)) {
            Ok(object) => Ok(&**object),
            Err(e) => Err(e.clone()),
        }
    }

    /// `!msos <args>`: forwards `args` untouched and prints the answer. Errors
    /// are returned, not printed; the command trampoline reports them.
    pub fn run(&mut self, host: &F::Host, output: &dyn Output, args: &str) -> anyhow::Result<()> {
        tracing::debug!(args, "msos invoked");
        let reply = self.acquire(host)?.echo(args)?;
        output.write_line(OutputMask::NORMAL, &reply)
    }
}

fn bootstrap<F: ObjectFactory>(
    factory: &F,
    config: fn() -> Result<ShimConfig>,
    host: &F::Host,
) -> Handle {
    let config = config()?;
    tracing::debug!(
        library = %config.library_path.display(),
        symbol = %config.factory_symbol,
        kind = ?config.factory_kind,
        "creating msos engine"
    );

    let handle = factory.create(&config, host);
    match &handle {
        Ok(_) => tracing::info!("msos engine ready"),
        Err(e) => tracing::warn!(error = %e, "msos engine failed to initialize"),
    }
    handle
}

/// A [`Shim`] behind a lock, built on first use and dropped on release. Safe
/// to share between threads that dispatch commands concurrently.
pub struct SharedShim<F> {
    slot: Mutex<Option<Shim<F>>>,
}

impl<F> SharedShim<F> {
    pub const fn new() -> Self {
        Self {
            slot: parking_lot::const_mutex(None),
        }
    }

    /// Drops the shim and the engine it holds. Returns whether there was one.
    pub fn release(&self) -> bool {
        self.slot.lock().take().is_some()
    }
}

impl<F> Default for SharedShim<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ObjectFactory> SharedShim<F> {
    /// Runs `!msos`, building the shim with `make` if there is none yet. The
    /// lock is held across the bootstrap, so the factory runs once.
    pub fn run<M>(
        &self,
        make: M,
        host: &F::Host,
        output: &dyn Output,
        args: &str,
    ) -> anyhow::Result<()>
    where
        M: FnOnce() -> Shim<F>,
    {
        let mut slot = self.slot.lock();
        slot.get_or_insert_with(make).run(host, output, args)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::output::recorder::Recorder;

    struct EchoEngine {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ForeignObject for EchoEngine {
        fn echo(&self, message: &str) -> Result<String> {
            self.seen.lock().unwrap().push(message.to_string());
            Ok(format!("<< {message} >>"))
        }
    }

    struct BrokenEngine;

    impl ForeignObject for BrokenEngine {
        fn echo(&self, _: &str) -> Result<String> {
            Err(ShimError::Echo("HRESULT 0x80004005".into()))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<String>>>,
        fail_with: Option<ShimError>,
        broken: bool,
    }

    impl ObjectFactory for CountingFactory {
        type Host = ();

        fn create(&self, _: &ShimConfig, _: &()) -> Result<Box<dyn ForeignObject + Send>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            if self.broken {
                return Ok(Box::new(BrokenEngine));
            }
            Ok(Box::new(EchoEngine {
                seen: self.seen.clone(),
            }))
        }
    }

    fn default_config() -> Result<ShimConfig> {
        Ok(ShimConfig::default())
    }

    fn bad_config() -> Result<ShimConfig> {
        Err(ShimError::Config("factory_symbol is empty".into()))
    }

    #[test]
    fn starts_uninitialized_and_creates_nothing() {
        let factory = CountingFactory::default();
        let created = factory.created.clone();
        let shim = Shim::with_config(factory, default_config);
        assert!(matches!(shim.state(), HandleState::Uninitialized));
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn forwards_arguments_verbatim_and_prints_reply() {
        let factory = CountingFactory::default();
        let seen = factory.seen.clone();
        let mut shim = Shim::with_config(factory, default_config);
        let out = Recorder::default();

        shim.run(&(), &out, "foo").unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["foo".to_string()]);
        assert_eq!(out.text(), "<< foo >>\n");
        assert_eq!(out.masks(), vec![OutputMask::NORMAL]);
        assert!(shim.state().is_ready());
    }

    #[test]
    fn raw_argument_string_is_not_trimmed_or_split() {
        let factory = CountingFactory::default();
        let seen = factory.seen.clone();
        let mut shim = Shim::with_config(factory, default_config);
        let out = Recorder::default();

        shim.run(&(), &out, "  !dumpheap -stat  ").unwrap();
        shim.run(&(), &out, "").unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["  !dumpheap -stat  ".to_string(), String::new()]
        );
        assert_eq!(out.text(), "<<   !dumpheap -stat   >>\n<<  >>\n");
    }

    #[test]
    fn repeated_invocations_reuse_the_engine() {
        let factory = CountingFactory::default();
        let created = factory.created.clone();
        let mut shim = Shim::with_config(factory, default_config);
        let out = Recorder::default();

        for arg in ["a", "b", "c"] {
            shim.run(&(), &out, arg).unwrap();
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(out.text(), "<< a >>\n<< b >>\n<< c >>\n");
    }

    #[test]
    fn missing_library_fails_predictably() {
        let err = ShimError::LibraryLoad {
            path: "C:\\missing\\msos.dll".into(),
            reason: "The specified module could not be found.".into(),
        };
        let factory = CountingFactory {
            fail_with: Some(err.clone()),
            ..Default::default()
        };
        let created = factory.created.clone();
        let mut shim = Shim::with_config(factory, default_config);
        let out = Recorder::default();

        let result = shim.run(&(), &out, "foo");

        let reported = result.unwrap_err();
        assert!(reported.to_string().starts_with("failed to load"));
        assert_eq!(reported.downcast_ref::<ShimError>(), Some(&err));
        assert!(matches!(shim.state(), HandleState::Failed(e) if *e == err));
        assert!(out.text().is_empty());
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    struct LoadingFactory;

    impl ObjectFactory for LoadingFactory {
        type Host = ();

        fn create(&self, config: &ShimConfig, _: &()) -> Result<Box<dyn ForeignObject + Send>> {
            let library = crate::loader::FactoryLibrary::open(&config.library_path)?;
            library.pin();
            Err(ShimError::NullObject {
                symbol: config.factory_symbol.clone(),
            })
        }
    }

    fn unreachable_library() -> Result<ShimConfig> {
        Ok(ShimConfig {
            library_path: std::env::temp_dir().join("msosext-test-missing").join("msos.dll"),
            ..ShimConfig::default()
        })
    }

    #[test]
    fn unloadable_library_never_reaches_the_engine() {
        let mut shim = Shim::with_config(LoadingFactory, unreachable_library);
        let out = Recorder::default();

        let err = shim.run(&(), &out, "foo").unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ShimError>(),
            Some(ShimError::LibraryLoad { .. })
        ));
        assert!(matches!(shim.state(), HandleState::Failed(_)));
        assert!(out.text().is_empty());
    }

    #[test]
    fn failure_is_sticky_and_not_retried() {
        let factory = CountingFactory {
            fail_with: Some(ShimError::NullObject {
                symbol: "CreateMsos".into(),
            }),
            ..Default::default()
        };
        let created = factory.created.clone();
        let mut shim = Shim::with_config(factory, default_config);
        let out = Recorder::default();

        let first = shim.run(&(), &out, "one").unwrap_err();
        let second = shim.run(&(), &out, "two").unwrap_err();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(first.to_string(), "CreateMsos did not return an msos object");
        assert_eq!(second.to_string(), first.to_string());
        assert!(out.text().is_empty());
    }

    #[test]
    fn config_error_skips_the_factory() {
        let factory = CountingFactory::default();
        let created = factory.created.clone();
        let mut shim = Shim::with_config(factory, bad_config);

        let err = shim.acquire(&()).err().unwrap();

        assert_eq!(err, ShimError::Config("factory_symbol is empty".into()));
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn echo_failure_is_reported_but_engine_stays_ready() {
        let factory = CountingFactory {
            broken: true,
            ..Default::default()
        };
        let mut shim = Shim::with_config(factory, default_config);
        let out = Recorder::default();

        let err = shim.run(&(), &out, "foo").unwrap_err();

        assert_eq!(err.to_string(), "msos Echo failed: HRESULT 0x80004005");
        assert!(shim.state().is_ready());
        assert!(out.text().is_empty());
    }

    struct ClientFactory {
        hosts: Arc<Mutex<Vec<String>>>,
    }

    impl ObjectFactory for ClientFactory {
        type Host = str;

        fn create(&self, config: &ShimConfig, host: &str) -> Result<Box<dyn ForeignObject + Send>> {
            self.hosts
                .lock()
                .unwrap()
                .push(format!("{host}/{:?}", config.factory_kind));
            Ok(Box::new(EchoEngine {
                seen: Arc::default(),
            }))
        }
    }

    fn with_client_config() -> Result<ShimConfig> {
        Ok(ShimConfig {
            factory_kind: crate::config::FactoryKind::WithClient,
            ..ShimConfig::default()
        })
    }

    #[test]
    fn first_caller_host_reaches_the_factory() {
        let hosts = Arc::new(Mutex::new(Vec::new()));
        let mut shim = Shim::with_config(
            ClientFactory {
                hosts: hosts.clone(),
            },
            with_client_config,
        );
        let out = Recorder::default();

        shim.run("client-1", &out, "a").unwrap();
        shim.run("client-2", &out, "b").unwrap();

        assert_eq!(*hosts.lock().unwrap(), vec!["client-1/WithClient".to_string()]);
    }

    #[test]
    fn concurrent_first_use_creates_one_engine() {
        const THREADS: usize = 8;

        let shared = Arc::new(SharedShim::<CountingFactory>::new());
        let created = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|i| {
                let shared = shared.clone();
                let created = created.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let out = Recorder::default();
                    barrier.wait();
                    shared
                        .run(
                            || {
                                let factory = CountingFactory {
                                    created,
                                    ..Default::default()
                                };
                                Shim::with_config(factory, default_config)
                            },
                            &(),
                            &out,
                            &format!("call {i}"),
                        )
                        .unwrap();
                    out.text()
                })
            })
            .collect();

        for (i, worker) in workers.into_iter().enumerate() {
            assert_eq!(worker.join().unwrap(), format!("<< call {i} >>\n"));
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_drops_the_engine_and_next_use_rebuilds() {
        let shared = SharedShim::<CountingFactory>::default();
        let created = Arc::new(AtomicUsize::new(0));
        let make = || CountingFactory {
            created: created.clone(),
            ..Default::default()
        };
        let out = Recorder::default();

        assert!(!shared.release());
        shared
            .run(|| Shim::with_config(make(), default_config), &(), &out, "a")
            .unwrap();
        assert!(shared.release());
        shared
            .run(|| Shim::with_config(make(), default_config), &(), &out, "b")
            .unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(out.text(), "<< a >>\n<< b >>\n");
    }
}
