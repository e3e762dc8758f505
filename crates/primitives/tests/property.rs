use lccd_consensus::Hash256;
use lccd_primitives::encoding::{DecodeError, Decoder, Encoder};
use lccd_primitives::merkle::{compute_merkle_root, merkle_branch, root_from_branch};
use lccd_primitives::outpoint::OutPoint;
use lccd_primitives::script::legacy_sigop_count;
use lccd_primitives::transaction::{Transaction, TxIn, TxOut};

const MAX_COMPACT_SIZE: u64 = 0x0200_0000;

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u8(&mut self) -> u8 {
        (self.next_u64() >> 56) as u8
    }

    fn gen_range(&mut self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            (self.next_u64() % max as u64) as usize
        }
    }
}

fn random_hash(rng: &mut Lcg) -> Hash256 {
    std::array::from_fn(|_| rng.next_u8())
}

fn random_vec(rng: &mut Lcg, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(max_len + 1);
    (0..len).map(|_| rng.next_u8()).collect()
}

fn random_transaction(rng: &mut Lcg) -> Transaction {
    let vin = (0..1 + rng.gen_range(3))
        .map(|_| TxIn {
            prevout: OutPoint::new(random_hash(rng), rng.next_u32()),
            script_sig: random_vec(rng, 80),
            sequence: rng.next_u32(),
        })
        .collect();
    let vout = (0..rng.gen_range(4))
        .map(|_| TxOut::new(rng.next_u32() as i64, random_vec(rng, 40)))
        .collect();
    Transaction {
        version: 1 + rng.gen_range(2) as i32,
        vin,
        vout,
        lock_time: rng.next_u32(),
    }
}

#[test]
fn compactsize_roundtrip_random() {
    let mut rng = Lcg::new(0x5eed);
    for _ in 0..1_000 {
        let value = rng.next_u64() % MAX_COMPACT_SIZE;
        let mut encoder = Encoder::new();
        encoder.write_varint(value);
        let bytes = encoder.into_inner();
        assert_eq!(bytes.len(), lccd_primitives::encoding::varint_len(value));
        let mut decoder = Decoder::new(&bytes);
        let decoded = decoder.read_varint().expect("decode compactsize");
        assert_eq!(decoded, value);
        assert!(decoder.is_empty());
    }
}

#[test]
fn compactsize_rejects_noncanonical() {
    let cases = [
        vec![0xfd, 0xfc, 0x00],
        vec![0xfe, 0xff, 0x00, 0x00, 0x00],
        vec![0xff, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    ];
    for bytes in cases {
        let mut decoder = Decoder::new(&bytes);
        let err = decoder.read_varint().expect_err("noncanonical compactsize");
        assert_eq!(err, DecodeError::NonCanonicalVarInt);
    }
}

#[test]
fn randomized_transaction_size_and_txid_stable() {
    let mut rng = Lcg::new(0x1234_5678);
    for _ in 0..200 {
        let tx = random_transaction(&mut rng);
        let encoded = tx.consensus_encode();
        assert_eq!(tx.serialized_size(), encoded.len());
        let decoded = Transaction::consensus_decode(&encoded).expect("decode random tx");
        assert_eq!(decoded.txid(), tx.txid());
    }
}

#[test]
fn truncated_transactions_fail_cleanly() {
    let mut rng = Lcg::new(0xdead_beef);
    for _ in 0..50 {
        let encoded = random_transaction(&mut rng).consensus_encode();
        let cut = rng.gen_range(encoded.len());
        assert!(Transaction::consensus_decode(&encoded[..cut]).is_err());
    }
}

#[test]
fn random_merkle_branches_verify() {
    let mut rng = Lcg::new(0x00c0_ffee);
    for _ in 0..40 {
        let count = 1 + rng.gen_range(33);
        let leaves: Vec<Hash256> = (0..count).map(|_| random_hash(&mut rng)).collect();
        let result = compute_merkle_root(&leaves);
        assert!(!result.duplicate_pair);
        assert_eq!(result.mutated, count > 1 && !count.is_power_of_two());

        let index = rng.gen_range(count);
        let branch = merkle_branch(&leaves, index);
        assert_eq!(root_from_branch(leaves[index], &branch, index), result.root);

        let mut tampered = leaves[index];
        tampered[0] ^= 1;
        assert_ne!(root_from_branch(tampered, &branch, index), result.root);
    }
}

#[test]
fn sigop_count_never_panics_on_garbage() {
    let mut rng = Lcg::new(7);
    for _ in 0..500 {
        let script = random_vec(&mut rng, 64);
        let count = legacy_sigop_count(&script);
        assert!(count <= 20 * script.len() as u32);
    }
}
