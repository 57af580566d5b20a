use anyhow::{Context, Result};
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{COINIT_MULTITHREADED, CoInitializeEx, CoUninitialize};

/// Balances COM init/uninit for one thread. Every worker thread holds one
/// of these for its whole lifetime.
pub(crate) struct CoInitGuard {
    should_uninit: bool,
}

impl CoInitGuard {
    /// Joins the multithreaded apartment. If the thread already sits in a
    /// different apartment mode we proceed without owning the init.
    pub fn init_multithreaded() -> Result<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self {
                should_uninit: false,
            });
        }

        hr.ok().context("CoInitializeEx(COINIT_MULTITHREADED) failed")?;
        Ok(Self {
            should_uninit: true,
        })
    }
}

impl Drop for CoInitGuard {
    fn drop(&mut self) {
        if self.should_uninit {
            unsafe {
                CoUninitialize();
            }
        }
    }
}
