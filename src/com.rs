//! COM side of the msos engine.
//!
//! `IMsos` is exported by a managed library and is not part of any Windows
//! metadata, so its vtable is laid out by hand. The factory hands back the
//! interface pointer directly and the extension never calls `QueryInterface`.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use windows::core::{Interface, IUnknown, BSTR, GUID, HRESULT};
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use crate::client::DebugClient;
use crate::config::{FactoryKind, ShimConfig};
use crate::error::{Result, ShimError};
use crate::foreign::{ForeignObject, ObjectFactory};
use crate::loader::FactoryLibrary;

#[repr(C)]
pub struct IMsosVtbl {
    // IUnknown
    pub query_interface:
        unsafe extern "system" fn(*mut IMsos, *const GUID, *mut *mut c_void) -> HRESULT,
    pub add_ref: unsafe extern "system" fn(*mut IMsos) -> u32,
    pub release: unsafe extern "system" fn(*mut IMsos) -> u32,
    // IMsos
    pub echo: unsafe extern "system" fn(*mut IMsos, *const u16, *mut BSTR) -> HRESULT,
}

#[repr(C)]
pub struct IMsos {
    pub vtbl: *const IMsosVtbl,
}

/// `void __stdcall CreateMsos(IMsos** msos)`
pub type CreateMsosFn = unsafe extern "system" fn(*mut *mut IMsos);

/// `void __stdcall CreateMsos(IUnknown* debugClient, IMsos** msos)`
pub type CreateMsosWithClientFn = unsafe extern "system" fn(*mut c_void, *mut *mut IMsos);

/// Multithreaded COM apartment for the calling thread, left on drop.
pub struct Apartment {
    balanced: bool,
}

impl Apartment {
    pub fn enter() -> Result<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            // The host already picked a single-threaded apartment.
            tracing::debug!("COM already initialized with another threading model");
            return Ok(Self { balanced: false });
        }

        hr.ok().map_err(|_| ShimError::ComInit(hr.0 as u32))?;
        Ok(Self { balanced: true })
    }
}

impl Drop for Apartment {
    fn drop(&mut self) {
        if self.balanced {
            unsafe { CoUninitialize() };
        }
    }
}

/// An owned `IMsos` reference. Released before its apartment is left.
pub struct ComMsos {
    object: NonNull<IMsos>,
    _apartment: Apartment,
}

// The object lives in the multithreaded apartment.
unsafe impl Send for ComMsos {}

impl ComMsos {
    fn vtbl(&self) -> &IMsosVtbl {
        unsafe { &*(*self.object.as_ptr()).vtbl }
    }
}

impl ForeignObject for ComMsos {
    fn echo(&self, message: &str) -> Result<String> {
        let message = BSTR::from(message).into_raw();
        let mut reply = BSTR::new();
        let hr = unsafe { (self.vtbl().echo)(self.object.as_ptr(), message, &mut reply) };
        drop(unsafe { BSTR::from_raw(message) });

        if hr.is_err() {
            return Err(ShimError::Echo(format!("HRESULT 0x{:08x}", hr.0 as u32)));
        }
        Ok(reply.to_string())
    }
}

impl Drop for ComMsos {
    fn drop(&mut self) {
        unsafe { (self.vtbl().release)(self.object.as_ptr()) };
    }
}

/// Loads the configured library and asks its factory for an `IMsos`.
pub struct ComFactory;

impl ObjectFactory for ComFactory {
    type Host = DebugClient;

    fn create(
        &self,
        config: &ShimConfig,
        client: &DebugClient,
    ) -> Result<Box<dyn ForeignObject + Send>> {
        let apartment = Apartment::enter()?;
        let library = FactoryLibrary::open(&config.library_path)?;
        let symbol = config.factory_symbol.as_str();

        let mut raw = ptr::null_mut();
        match config.factory_kind {
            FactoryKind::Plain => {
                let create: CreateMsosFn = unsafe { library.entry_point(symbol)? };
                unsafe { create(&mut raw) };
            }
            FactoryKind::WithClient => {
                let create: CreateMsosWithClientFn = unsafe { library.entry_point(symbol)? };
                let unknown = client
                    .raw()
                    .cast::<IUnknown>()
                    .map_err(|e| ShimError::ComInit(e.code().0 as u32))?;
                // The engine takes its own reference if it keeps the client.
                unsafe { create(unknown.as_raw(), &mut raw) };
            }
        }
        // Whatever the factory did, the managed runtime is now loaded.
        library.pin();

        let object = NonNull::new(raw).ok_or_else(|| ShimError::NullObject {
            symbol: config.factory_symbol.clone(),
        })?;

        Ok(Box::new(ComMsos {
            object,
            _apartment: apartment,
        }))
    }
}
