//! Script templates and opcode-level helpers used by consensus and policy.
//!
//! Full script evaluation is not performed here; these helpers only look at
//! script shape (standard templates, sigop counting, the Hive markers).

use lccd_consensus::constants::MAX_SCRIPT_SIZE;

pub const OP_0: u8 = 0x00;
pub const OP_FALSE: u8 = OP_0;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_TRUE: u8 = OP_1;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
/// Marker opcode for bee creation outputs and Hive proofs (repurposed OP_NOP10).
pub const OP_BEE: u8 = 0xb9;

const MAX_PUBKEYS_PER_MULTISIG: u32 = 20;
const P2PKH_LEN: usize = 25;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    P2Wpkh,
    P2Wsh,
    NullData,
    Unknown,
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if p2pkh_key_hash(script).is_some() {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if script.len() == 22 && script[0] == OP_0 && script[1] == 0x14 {
        ScriptType::P2Wpkh
    } else if script.len() == 34 && script[0] == OP_0 && script[1] == 0x20 {
        ScriptType::P2Wsh
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else if script.first() == Some(&OP_RETURN) && is_push_only(&script[1..]) {
        ScriptType::NullData
    } else {
        ScriptType::Unknown
    }
}

pub fn p2pkh_script(key_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(P2PKH_LEN);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
    script.extend_from_slice(key_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn p2pkh_key_hash(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() != P2PKH_LEN
        || script[0] != OP_DUP
        || script[1] != OP_HASH160
        || script[2] != 0x14
        || script[23] != OP_EQUALVERIFY
        || script[24] != OP_CHECKSIG
    {
        return None;
    }
    let mut key_hash = [0u8; 20];
    key_hash.copy_from_slice(&script[3..23]);
    Some(key_hash)
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_p2pk(script: &[u8]) -> bool {
    let key_len = match script.first().copied() {
        Some(len @ 33) | Some(len @ 65) => len as usize,
        _ => return false,
    };
    script.len() == key_len + 2 && script[script.len() - 1] == OP_CHECKSIG
}

/// Outputs that can never be spent and are kept out of the coin set.
pub fn is_unspendable(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN) || script.len() > MAX_SCRIPT_SIZE
}

/// A bee creation output pays the creation address, followed by
/// `OP_RETURN OP_BEE` and the honey (reward) P2PKH script. Returns the honey
/// script when `script` has that shape.
pub fn bct_honey_script<'a>(script: &'a [u8], bee_creation_key_hash: &[u8; 20]) -> Option<&'a [u8]> {
    if script.len() != P2PKH_LEN + 2 + P2PKH_LEN {
        return None;
    }
    let (creation, rest) = script.split_at(P2PKH_LEN);
    if p2pkh_key_hash(creation)? != *bee_creation_key_hash {
        return None;
    }
    if rest[0] != OP_RETURN || rest[1] != OP_BEE {
        return None;
    }
    let honey = &rest[2..];
    p2pkh_key_hash(honey)?;
    Some(honey)
}

pub fn bct_script(bee_creation_key_hash: &[u8; 20], honey_key_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = p2pkh_script(bee_creation_key_hash);
    script.push(OP_RETURN);
    script.push(OP_BEE);
    script.extend_from_slice(&p2pkh_script(honey_key_hash));
    script
}

/// Walks the opcodes of a script, yielding `(opcode, push_data)`. Iteration
/// stops at the first malformed push.
pub struct Instructions<'a> {
    script: &'a [u8],
    cursor: usize,
    malformed: bool,
}

impl<'a> Instructions<'a> {
    pub fn new(script: &'a [u8]) -> Self {
        Self {
            script,
            cursor: 0,
            malformed: false,
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    fn read_len(&mut self, width: usize) -> Option<usize> {
        let end = self.cursor.checked_add(width)?;
        let bytes = self.script.get(self.cursor..end)?;
        self.cursor = end;
        let mut raw = [0u8; 4];
        raw[..width].copy_from_slice(bytes);
        Some(u32::from_le_bytes(raw) as usize)
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.malformed || self.cursor >= self.script.len() {
            return None;
        }
        let opcode = self.script[self.cursor];
        self.cursor += 1;
        let len = match opcode {
            0x01..=0x4b => Some(opcode as usize),
            OP_PUSHDATA1 => self.read_len(1),
            OP_PUSHDATA2 => self.read_len(2),
            OP_PUSHDATA4 => self.read_len(4),
            _ => return Some((opcode, &[])),
        };
        let Some(len) = len else {
            self.malformed = true;
            return None;
        };
        let Some(data) = self
            .cursor
            .checked_add(len)
            .and_then(|end| self.script.get(self.cursor..end))
        else {
            self.malformed = true;
            return None;
        };
        self.cursor += len;
        Some((opcode, data))
    }
}

pub fn is_push_only(script: &[u8]) -> bool {
    let mut instructions = Instructions::new(script);
    let all_pushes = instructions.all(|(opcode, _)| opcode <= OP_16);
    all_pushes && !instructions.is_malformed()
}

/// Legacy (inaccurate) signature operation count: every multisig counts as
/// the maximum number of keys.
pub fn legacy_sigop_count(script: &[u8]) -> u32 {
    Instructions::new(script)
        .map(|(opcode, _)| match opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => MAX_PUBKEYS_PER_MULTISIG,
            _ => 0,
        })
        .sum()
}
