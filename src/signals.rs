//! Signal handling (spec §4.8, §5). SIGSEGV/SIGBUS reset the worker's FSA
//! slot, set `IS_FAULTY_VAR` on the host entry, and abort with a core dump;
//! SIGINT/SIGQUIT are converted into a single cancellation token observed
//! at suspension points rather than acted on inside the handler, per the
//! re-architecture guidance in spec §9; SIGTERM/SIGHUP/SIGPIPE are ignored
//! so transient peer errors surface as ordinary I/O errors instead of
//! killing the process.
//!
//! The fault handler is the one place this crate steps outside of
//! async-signal-safety norms on purpose: it writes directly into the FSA
//! slot's and host-status raw memory before calling `abort()`, mirroring
//! what the source this worker re-implements does in its own SIGSEGV
//! handler. The pointers are published once at startup and never mutated
//! afterward.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

/// `HostStatusFlags::IS_FAULTY_VAR`'s bit, as it falls within the last byte
/// of the big-endian-encoded `host_status` field (see `fsa::encode_into`).
const IS_FAULTY_VAR_LOW_BYTE_BIT: u8 = 0x80;

static FSA_SLOT_PTR: AtomicPtr<u8> = AtomicPtr::new(std::ptr::null_mut());
static FSA_SLOT_LEN: AtomicUsize = AtomicUsize::new(0);
static FSA_HOST_STATUS_PTR: AtomicPtr<u8> = AtomicPtr::new(std::ptr::null_mut());
static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);
static SIGQUIT_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn fault_handler(_signum: i32) {
    let ptr = FSA_SLOT_PTR.load(Ordering::SeqCst);
    let len = FSA_SLOT_LEN.load(Ordering::SeqCst);
    if !ptr.is_null() && len > 0 {
        unsafe { std::ptr::write_bytes(ptr, 0, len) };
    }
    let hs_ptr = FSA_HOST_STATUS_PTR.load(Ordering::SeqCst);
    if !hs_ptr.is_null() {
        unsafe { *hs_ptr.add(3) |= IS_FAULTY_VAR_LOW_BYTE_BIT };
    }
    unsafe { libc::abort() };
}

extern "C" fn sigint_handler(_signum: i32) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

extern "C" fn sigquit_handler(_signum: i32) {
    SIGQUIT_RECEIVED.store(true, Ordering::SeqCst);
}

/// What a suspension point should do after observing the cancellation
/// token, before the caller consults the FSA shutdown marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingSignal {
    Sigint,
    Sigquit,
}

/// A cheap, cloneable handle suspension points poll between blocking
/// syscalls (spec §5).
#[derive(Clone, Default)]
pub struct CancellationToken {
    _marker: Arc<()>,
}

impl CancellationToken {
    pub fn poll(&self) -> Option<PendingSignal> {
        if SIGQUIT_RECEIVED.swap(false, Ordering::SeqCst) {
            return Some(PendingSignal::Sigquit);
        }
        if SIGINT_RECEIVED.swap(false, Ordering::SeqCst) {
            return Some(PendingSignal::Sigint);
        }
        None
    }
}

/// Installs all five handlers named in spec §4.8 and publishes the FSA
/// slot's memory range (zeroed on SIGSEGV/SIGBUS) and the host entry's
/// `host_status` field (OR'd with `IS_FAULTY_VAR` on the same signals).
/// Must be called once, early in `main`, before the FSA is touched by any
/// other code path.
pub fn install(
    fsa_slot_ptr: *mut u8,
    fsa_slot_len: usize,
    fsa_host_status_ptr: *mut u8,
) -> nix::Result<CancellationToken> {
    FSA_SLOT_PTR.store(fsa_slot_ptr, Ordering::SeqCst);
    FSA_SLOT_LEN.store(fsa_slot_len, Ordering::SeqCst);
    FSA_HOST_STATUS_PTR.store(fsa_host_status_ptr, Ordering::SeqCst);

    let fault_action =
        SigAction::new(SigHandler::Handler(fault_handler), SaFlags::SA_NODEFER, SigSet::empty());
    unsafe {
        signal::sigaction(Signal::SIGSEGV, &fault_action)?;
        signal::sigaction(Signal::SIGBUS, &fault_action)?;
    }

    let sigint_action =
        SigAction::new(SigHandler::Handler(sigint_handler), SaFlags::empty(), SigSet::empty());
    let sigquit_action =
        SigAction::new(SigHandler::Handler(sigquit_handler), SaFlags::empty(), SigSet::empty());
    unsafe {
        signal::sigaction(Signal::SIGINT, &sigint_action)?;
        signal::sigaction(Signal::SIGQUIT, &sigquit_action)?;

        signal::sigaction(
            Signal::SIGTERM,
            &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
        )?;
        signal::sigaction(
            Signal::SIGHUP,
            &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
        )?;
        signal::sigaction(
            Signal::SIGPIPE,
            &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
        )?;
    }

    Ok(CancellationToken::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_drains_sigquit_before_sigint() {
        SIGINT_RECEIVED.store(true, Ordering::SeqCst);
        SIGQUIT_RECEIVED.store(true, Ordering::SeqCst);
        let token = CancellationToken::default();
        assert_eq!(token.poll(), Some(PendingSignal::Sigquit));
        assert_eq!(token.poll(), Some(PendingSignal::Sigint));
        assert_eq!(token.poll(), None);
    }
}
