//! Boundary to the script interpreter and the per-input check jobs handed to
//! the [`CheckQueue`](crate::checkqueue::CheckQueue).

use std::fmt;
use std::sync::Arc;

use lccd_consensus::money::Amount;
use lccd_consensus::Hash256;
use lccd_log::{log_category, Category};
use lccd_primitives::script::{is_push_only, is_unspendable};
use lccd_primitives::transaction::Transaction;

use crate::checkqueue::Check;

pub type ScriptFlags = u32;

pub const SCRIPT_VERIFY_NONE: ScriptFlags = 0;
pub const SCRIPT_VERIFY_P2SH: ScriptFlags = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: ScriptFlags = 1 << 1;
pub const SCRIPT_VERIFY_DERSIG: ScriptFlags = 1 << 2;
pub const SCRIPT_VERIFY_LOW_S: ScriptFlags = 1 << 3;
pub const SCRIPT_VERIFY_NULLDUMMY: ScriptFlags = 1 << 4;
pub const SCRIPT_VERIFY_SIGPUSHONLY: ScriptFlags = 1 << 5;
pub const SCRIPT_VERIFY_MINIMALDATA: ScriptFlags = 1 << 6;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS: ScriptFlags = 1 << 7;
pub const SCRIPT_VERIFY_CLEANSTACK: ScriptFlags = 1 << 8;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: ScriptFlags = 1 << 9;
pub const SCRIPT_VERIFY_CHECKSEQUENCEVERIFY: ScriptFlags = 1 << 10;

pub const MANDATORY_SCRIPT_VERIFY_FLAGS: ScriptFlags = SCRIPT_VERIFY_P2SH;
pub const STANDARD_SCRIPT_VERIFY_FLAGS: ScriptFlags = MANDATORY_SCRIPT_VERIFY_FLAGS
    | SCRIPT_VERIFY_DERSIG
    | SCRIPT_VERIFY_STRICTENC
    | SCRIPT_VERIFY_MINIMALDATA
    | SCRIPT_VERIFY_NULLDUMMY
    | SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | SCRIPT_VERIFY_CLEANSTACK
    | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY
    | SCRIPT_VERIFY_CHECKSEQUENCEVERIFY
    | SCRIPT_VERIFY_LOW_S;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptFailure {
    EvalFalse,
    SigPushOnly,
    Unspendable,
    SigCheck,
    Other(&'static str),
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptFailure::EvalFalse => write!(f, "script evaluated to false"),
            ScriptFailure::SigPushOnly => write!(f, "scriptSig is not push-only"),
            ScriptFailure::Unspendable => write!(f, "output is unspendable"),
            ScriptFailure::SigCheck => write!(f, "signature check failed"),
            ScriptFailure::Other(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ScriptFailure {}

/// Evaluates one input's unlocking script against the output it spends.
pub trait ScriptVerifier: Send + Sync {
    fn verify(
        &self,
        script_sig: &[u8],
        script_pubkey: &[u8],
        tx: &Transaction,
        input_index: usize,
        flags: ScriptFlags,
        amount: Amount,
    ) -> Result<(), ScriptFailure>;
}

/// Structural verifier for tooling and tests: requires a push-only scriptSig
/// and a spendable output, and evaluates nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct PushOnlyVerifier;

impl ScriptVerifier for PushOnlyVerifier {
    fn verify(
        &self,
        script_sig: &[u8],
        script_pubkey: &[u8],
        _tx: &Transaction,
        _input_index: usize,
        _flags: ScriptFlags,
        _amount: Amount,
    ) -> Result<(), ScriptFailure> {
        if is_unspendable(script_pubkey) {
            return Err(ScriptFailure::Unspendable);
        }
        if !is_push_only(script_sig) {
            return Err(ScriptFailure::SigPushOnly);
        }
        Ok(())
    }
}

/// One input's verification, runnable on any check queue thread.
pub struct ScriptCheck {
    pub verifier: Arc<dyn ScriptVerifier>,
    pub tx: Arc<Transaction>,
    pub txid: Hash256,
    pub input_index: usize,
    pub script_pubkey: Vec<u8>,
    pub amount: Amount,
    pub flags: ScriptFlags,
}

impl ScriptCheck {
    pub fn run(&self) -> Result<(), ScriptFailure> {
        let script_sig = self
            .tx
            .vin
            .get(self.input_index)
            .map(|input| input.script_sig.as_slice())
            .ok_or(ScriptFailure::Other("input index out of range"))?;
        self.verifier.verify(
            script_sig,
            &self.script_pubkey,
            &self.tx,
            self.input_index,
            self.flags,
            self.amount,
        )
    }
}

impl Check for ScriptCheck {
    fn check(self) -> bool {
        match self.run() {
            Ok(()) => true,
            Err(failure) => {
                log_category!(
                    Category::Validation,
                    "script check failed for {} input {}: {failure}",
                    lccd_primitives::hash256_to_hex(&self.txid),
                    self.input_index
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lccd_primitives::outpoint::OutPoint;
    use lccd_primitives::transaction::{TxIn, TxOut};

    fn spender(script_sig: Vec<u8>) -> Arc<Transaction> {
        Arc::new(Transaction {
            version: 1,
            vin: vec![TxIn::new(OutPoint::new([4u8; 32], 0), script_sig)],
            vout: vec![TxOut::new(1_000, vec![0x51])],
            lock_time: 0,
        })
    }

    fn job(tx: Arc<Transaction>, script_pubkey: Vec<u8>, input_index: usize) -> ScriptCheck {
        ScriptCheck {
            verifier: Arc::new(PushOnlyVerifier),
            txid: tx.txid(),
            tx,
            input_index,
            script_pubkey,
            amount: 1_000,
            flags: MANDATORY_SCRIPT_VERIFY_FLAGS,
        }
    }

    #[test]
    fn push_only_verifier_rules() {
        assert!(job(spender(vec![0x01, 0xaa]), vec![0x51], 0).check());
        assert_eq!(
            job(spender(vec![0x76]), vec![0x51], 0).run(),
            Err(ScriptFailure::SigPushOnly)
        );
        assert_eq!(
            job(spender(Vec::new()), vec![0x6a], 0).run(),
            Err(ScriptFailure::Unspendable)
        );
        assert!(!job(spender(Vec::new()), vec![0x51], 3).check());
    }
}
