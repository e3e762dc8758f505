use lccd_primitives::outpoint::OutPoint;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MempoolErrorKind {
    AlreadyInMempool,
    /// Spends an output another pool entry spends and replacement failed.
    Conflict,
    TooLongChain,
    MinFeeNotMet,
    InsufficientFee,
    NonStandard,
    MempoolFull,
    MissingInputs,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MempoolError {
    pub kind: MempoolErrorKind,
    /// Short reject code reported to peers.
    pub reason: &'static str,
    pub detail: String,
    pub missing_inputs: Vec<OutPoint>,
}

impl MempoolError {
    pub fn new(kind: MempoolErrorKind, reason: &'static str) -> Self {
        Self {
            kind,
            reason,
            detail: String::new(),
            missing_inputs: Vec::new(),
        }
    }

    pub fn with_detail(kind: MempoolErrorKind, reason: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            reason,
            detail: detail.into(),
            missing_inputs: Vec::new(),
        }
    }

    pub fn already_in_mempool() -> Self {
        Self::new(MempoolErrorKind::AlreadyInMempool, "txn-already-in-mempool")
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::with_detail(MempoolErrorKind::Conflict, "txn-mempool-conflict", detail)
    }

    pub fn too_long_chain(detail: impl Into<String>) -> Self {
        Self::with_detail(MempoolErrorKind::TooLongChain, "too-long-mempool-chain", detail)
    }

    pub fn missing_inputs(missing_inputs: Vec<OutPoint>) -> Self {
        Self {
            kind: MempoolErrorKind::MissingInputs,
            reason: "missing-inputs",
            detail: String::new(),
            missing_inputs,
        }
    }
}

impl std::fmt::Display for MempoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}, {}", self.reason, self.detail)
        }
    }
}

impl std::error::Error for MempoolError {}
