//! Component G, the cryptographic acceptance gate (spec §4.G, §7).
//!
//! `verify` is the sole path by which a transfer is allowed to replace
//! application, soft device, or bootloader flash. Its defaults favor
//! rejection: no public key provisioned is the one case that accepts
//! unconditionally (a device with no key has opted out of the gate
//! entirely). Every other shortfall is rejected: a zero-length signature, a
//! signature too long to fit the fixed buffer, a writer that cannot produce
//! the bytes, or a failed ECDSA check.

use crate::collaborators::{DfuWriter, EcdsaVerify};
use crate::info::Info;
use crate::transaction::Transaction;

/// ECDSA (secp256r1) signatures are a fixed 64 bytes: two 32-byte
/// components. Nothing in this protocol ever produces a longer one.
pub const MAX_SIGNATURE_LEN: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VerifyOutcome {
    Accepted,
    Rejected,
}

/// Decide whether `txn`'s image, as committed by `writer`, may be launched.
///
/// The signature is read out of the trailing `signature_length` bytes of the
/// staged image, i.e. `[bank_addr + length - signature_length, bank_addr +
/// length)` (spec §4.G).
#[must_use]
pub fn verify(info: &Info, txn: &Transaction, writer: &impl DfuWriter, ecdsa: &impl EcdsaVerify) -> VerifyOutcome {
    let Some(pubkey) = info.ecdsa_public_key() else {
        return VerifyOutcome::Accepted;
    };

    if txn.signature_length == 0 || txn.signature_length as usize > MAX_SIGNATURE_LEN {
        return VerifyOutcome::Rejected;
    }
    if txn.signature_length > txn.length {
        return VerifyOutcome::Rejected;
    }

    let sig_addr = txn.bank_addr + (txn.length - txn.signature_length);
    let mut sig_buf = [0u8; MAX_SIGNATURE_LEN];
    let Some(sig_slice) = sig_buf.get_mut(..txn.signature_length as usize) else {
        return VerifyOutcome::Rejected;
    };
    if !writer.has_entry(sig_addr, sig_slice) {
        return VerifyOutcome::Rejected;
    }

    let hash = writer.sha256();
    if ecdsa.verify(pubkey, &hash, sig_slice) {
        VerifyOutcome::Accepted
    } else {
        VerifyOutcome::Rejected
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::BootloaderError;
    use crate::identity::{AppId, DfuType, FwId, TargetId};
    use crate::info::{Flags, MemorySegment};

    struct FakeWriter {
        has_entry: bool,
        hash: [u8; 32],
    }

    impl DfuWriter for FakeWriter {
        fn start(&mut self, _dst: u32, _bank: u32, _length: u32, _last_is_valid: bool) -> Result<(), BootloaderError> {
            Ok(())
        }
        fn data(&mut self, _addr: u32, _bytes: &[u8]) -> Result<(), BootloaderError> {
            Ok(())
        }
        fn end(&mut self) {}
        fn has_entry(&self, _addr: u32, out: &mut [u8]) -> bool {
            if self.has_entry {
                out.fill(0xAB);
                true
            } else {
                false
            }
        }
        fn sha256(&self) -> [u8; 32] {
            self.hash
        }
    }

    struct FakeEcdsa {
        accept: bool,
    }

    impl EcdsaVerify for FakeEcdsa {
        fn verify(&self, _pubkey: &[u8; 64], _hash: &[u8; 32], _signature: &[u8]) -> bool {
            self.accept
        }
    }

    fn info_with_key(key: Option<[u8; 64]>) -> Info {
        Info::load(
            Some(Flags {
                sd_intact: true,
                app_intact: true,
            }),
            Some(FwId::default()),
            Some(MemorySegment {
                start: 0x1_8000,
                length: 0x2_0000,
            }),
            Some(MemorySegment {
                start: 0x3_8000,
                length: 0x1000,
            }),
            Some(MemorySegment {
                start: 0x1000,
                length: 0x1_7000,
            }),
            key,
        )
        .unwrap()
    }

    fn base_txn() -> Transaction {
        let mut txn = Transaction::start_req(DfuType::App, TargetId::App(AppId::default()));
        txn.bank_addr = 0x3_8000;
        txn.length = 1024;
        txn.signature_length = 64;
        txn
    }

    #[test]
    fn no_public_key_accepts_unconditionally() {
        let info = info_with_key(None);
        let txn = base_txn();
        let writer = FakeWriter {
            has_entry: false,
            hash: [0; 32],
        };
        let ecdsa = FakeEcdsa { accept: false };
        assert_eq!(verify(&info, &txn, &writer, &ecdsa), VerifyOutcome::Accepted);
    }

    #[test]
    fn zero_length_signature_is_rejected_when_key_present() {
        let info = info_with_key(Some([0x11; 64]));
        let mut txn = base_txn();
        txn.signature_length = 0;
        let writer = FakeWriter {
            has_entry: true,
            hash: [0; 32],
        };
        let ecdsa = FakeEcdsa { accept: true };
        assert_eq!(verify(&info, &txn, &writer, &ecdsa), VerifyOutcome::Rejected);
    }

    #[test]
    fn valid_signature_is_accepted() {
        let info = info_with_key(Some([0x11; 64]));
        let txn = base_txn();
        let writer = FakeWriter {
            has_entry: true,
            hash: [0x99; 32],
        };
        let ecdsa = FakeEcdsa { accept: true };
        assert_eq!(verify(&info, &txn, &writer, &ecdsa), VerifyOutcome::Accepted);
    }

    #[test]
    fn failed_ecdsa_check_is_rejected() {
        let info = info_with_key(Some([0x11; 64]));
        let txn = base_txn();
        let writer = FakeWriter {
            has_entry: true,
            hash: [0x99; 32],
        };
        let ecdsa = FakeEcdsa { accept: false };
        assert_eq!(verify(&info, &txn, &writer, &ecdsa), VerifyOutcome::Rejected);
    }

    #[test]
    fn missing_staged_bytes_is_rejected() {
        let info = info_with_key(Some([0x11; 64]));
        let txn = base_txn();
        let writer = FakeWriter {
            has_entry: false,
            hash: [0; 32],
        };
        let ecdsa = FakeEcdsa { accept: true };
        assert_eq!(verify(&info, &txn, &writer, &ecdsa), VerifyOutcome::Rejected);
    }
}
