use std::sync::{Arc, Mutex};

use lccd_chainstate::state::{ChainState, ChainStateConfig};
use lccd_chainstate::{PushOnlyVerifier, RejectClass, ThresholdState, ValidationObserver};
use lccd_consensus::params::{consensus_params, Network};
use lccd_consensus::{block_subsidy, ConsensusParams, Deployment, Hash256};
use lccd_mempool::{MempoolEntry, RemovalReason};
use lccd_pow::validation::{validate_pow_header, NoExternalHashers};
use lccd_primitives::block::{Block, BlockHeader};
use lccd_primitives::merkle::compute_merkle_root;
use lccd_primitives::outpoint::OutPoint;
use lccd_primitives::script::p2pkh_script;
use lccd_primitives::transaction::{Transaction, TxIn, TxOut};
use lccd_storage::memory::MemoryStore;

const BASE_TIME: u32 = 1_600_000_000;
const SPACING: u32 = 150;
const EASY_BITS: u32 = 0x207f_ffff;

fn coinbase_tx(height: i32, value: i64, tag: u8) -> Transaction {
    let mut script_sig = vec![0x04];
    script_sig.extend_from_slice(&height.to_le_bytes());
    script_sig.push(tag);
    Transaction {
        version: 1,
        vin: vec![TxIn::new(OutPoint::null(), script_sig)],
        vout: vec![TxOut::new(value, p2pkh_script(&[tag; 20]))],
        lock_time: 0,
    }
}

fn spend_tx(prevouts: &[OutPoint], values: &[i64], sequence: u32, tag: u8) -> Transaction {
    Transaction {
        version: 1,
        vin: prevouts
            .iter()
            .map(|prevout| {
                let mut input = TxIn::new(*prevout, vec![0x01, tag]);
                input.sequence = sequence;
                input
            })
            .collect(),
        vout: values
            .iter()
            .map(|value| TxOut::new(*value, p2pkh_script(&[tag; 20])))
            .collect(),
        lock_time: 0,
    }
}

fn make_block(
    prev_block: Hash256,
    time: u32,
    transactions: Vec<Transaction>,
    params: &ConsensusParams,
) -> Block {
    let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();
    let mut header = BlockHeader {
        version: 0x2000_0000,
        prev_block,
        merkle_root: compute_merkle_root(&txids).root,
        time,
        bits: EASY_BITS,
        nonce: 0,
    };
    while header.nonce == params.hive.hive_nonce_marker
        || validate_pow_header(&header, &NoExternalHashers, params).is_err()
    {
        header.nonce += 1;
    }
    Block {
        header,
        transactions,
    }
}

#[derive(Default)]
struct Recorder {
    accepted: Mutex<Vec<Hash256>>,
    removed: Mutex<Vec<(Hash256, RemovalReason)>>,
    connected: Mutex<Vec<i32>>,
}

impl ValidationObserver for Recorder {
    fn transaction_accepted(&self, entry: &MempoolEntry) {
        self.accepted.lock().expect("accepted").push(entry.txid);
    }

    fn transaction_removed(&self, entry: &MempoolEntry, reason: RemovalReason) {
        self.removed
            .lock()
            .expect("removed")
            .push((entry.txid, reason));
    }

    fn block_connected(&self, _block: &Block, height: i32) {
        self.connected.lock().expect("connected").push(height);
    }
}

struct Harness {
    chain: ChainState<MemoryStore>,
    params: ConsensusParams,
    recorder: Arc<Recorder>,
    tip: Hash256,
    height: i32,
    coinbases: Vec<Transaction>,
}

impl Harness {
    fn new() -> Self {
        let params = consensus_params(Network::Regtest);
        let genesis = make_block([0u8; 32], BASE_TIME, vec![coinbase_tx(0, 0, 0)], &params);
        let recorder = Arc::new(Recorder::default());
        let config = ChainStateConfig {
            script_threads: 2,
            ..ChainStateConfig::default()
        };
        let chain = ChainState::new(
            Arc::new(MemoryStore::new()),
            &genesis,
            params.clone(),
            config,
            Arc::new(PushOnlyVerifier),
            Arc::new(NoExternalHashers),
        )
        .expect("chain state")
        .with_observer(recorder.clone());
        Self {
            chain,
            params,
            recorder,
            tip: genesis.header.hash(),
            height: 0,
            coinbases: vec![genesis.transactions[0].clone()],
        }
    }

    fn next_time(&self) -> u32 {
        BASE_TIME + SPACING * (self.height as u32 + 1)
    }

    fn build(&self, transactions: Vec<Transaction>, fees: i64) -> Block {
        let height = self.height + 1;
        let reward = block_subsidy(height, &self.params) + fees;
        let mut all = vec![coinbase_tx(height, reward, (height % 250) as u8 + 1)];
        all.extend(transactions);
        make_block(self.tip, self.next_time(), all, &self.params)
    }

    fn mine(&mut self, transactions: Vec<Transaction>, fees: i64) -> Block {
        let block = self.build(transactions, fees);
        let now = i64::from(block.header.time);
        let connected = self.chain.connect_block(&block, now).expect("connect");
        assert_eq!(connected.height, self.height + 1);
        assert_eq!(connected.fees, fees);
        self.tip = block.header.hash();
        self.height = connected.height;
        self.coinbases.push(block.transactions[0].clone());
        block
    }

    fn coinbase_outpoint(&self, height: usize) -> OutPoint {
        OutPoint::new(self.coinbases[height].txid(), 0)
    }

    fn coinbase_value(&self, height: usize) -> i64 {
        self.coinbases[height].vout[0].value
    }

    fn now(&self) -> i64 {
        i64::from(self.next_time())
    }
}

#[test]
fn connects_a_chain_and_reports_deployments() {
    let mut harness = Harness::new();
    for _ in 0..3 {
        harness.mine(Vec::new(), 0);
    }
    assert_eq!(harness.chain.height().expect("height"), 3);
    assert_eq!(harness.chain.tip().expect("tip").hash, harness.tip);
    assert_eq!(*harness.recorder.connected.lock().expect("connected"), vec![1, 2, 3]);

    let coin = harness
        .chain
        .coin(&harness.coinbase_outpoint(2))
        .expect("coin lookup")
        .expect("coinbase coin");
    assert!(coin.is_coinbase);
    assert_eq!(coin.height, 2);

    assert!(harness.chain.get_difficulty().expect("difficulty") > 0.0);
    let bits = harness
        .chain
        .get_next_work_required(
            lccd_pow::BlockKind::Pow(lccd_consensus::PowType::Sha256d),
            harness.now(),
        )
        .expect("next work");
    assert_eq!(bits, EASY_BITS);

    let segwit = harness
        .chain
        .deployment_state(Deployment::Segwit)
        .expect("segwit");
    assert_eq!(segwit.state, ThresholdState::Active);
    let hive = harness.chain.deployment_state(Deployment::Hive).expect("hive");
    assert_eq!(hive.state, ThresholdState::Failed);
    let csv = harness.chain.deployment_state(Deployment::Csv).expect("csv");
    assert_eq!(csv.state, ThresholdState::Defined);

    let outcome = harness
        .chain
        .network_hive_info(false)
        .expect_err("no block source");
    assert_eq!(outcome.class, RejectClass::Internal);
}

#[test]
fn immature_coinbase_spend_is_consensus_invalid() {
    let mut harness = Harness::new();
    harness.mine(Vec::new(), 0);

    let prevout = harness.coinbase_outpoint(1);
    let spend = spend_tx(
        &[prevout],
        &[harness.coinbase_value(1) - 10_000],
        u32::MAX,
        9,
    );
    let block = harness.build(vec![spend], 10_000);
    let now = i64::from(block.header.time);
    let outcome = harness
        .chain
        .connect_block(&block, now)
        .expect_err("premature spend");
    assert_eq!(outcome.class, RejectClass::Consensus);
    assert_eq!(outcome.reason, "bad-txns-premature-spend-of-coinbase");

    assert_eq!(harness.chain.height().expect("height"), 1);
    assert!(harness.chain.coin(&prevout).expect("coin lookup").is_some());

    let again = harness
        .chain
        .connect_block(&block, now)
        .expect_err("known invalid");
    assert_eq!(again.class, RejectClass::Consensus);
    assert_eq!(again.reason, "duplicate-invalid");
}

#[test]
fn block_level_rejections_carry_their_class() {
    let mut harness = Harness::new();
    let first = harness.mine(Vec::new(), 0);

    let duplicate = harness
        .chain
        .connect_block(&first, harness.now())
        .expect_err("duplicate");
    assert_eq!(duplicate.class, RejectClass::Policy);

    let orphan = make_block(
        [7u8; 32],
        harness.next_time(),
        vec![coinbase_tx(5, 0, 3)],
        &harness.params,
    );
    let outcome = harness
        .chain
        .connect_block(&orphan, harness.now())
        .expect_err("unknown parent");
    assert_eq!(outcome.class, RejectClass::Orphan);

    let mut greedy = harness.build(Vec::new(), 0);
    greedy.transactions[0].vout[0].value += 1;
    let txids: Vec<Hash256> = greedy.transactions.iter().map(Transaction::txid).collect();
    let greedy = make_block(
        greedy.header.prev_block,
        greedy.header.time,
        greedy.transactions,
        &harness.params,
    );
    assert_eq!(greedy.header.merkle_root, compute_merkle_root(&txids).root);
    let outcome = harness
        .chain
        .connect_block(&greedy, harness.now())
        .expect_err("overpaying coinbase");
    assert_eq!(outcome.class, RejectClass::Consensus);
    assert_eq!(outcome.reason, "bad-cb-amount");

    let mut wrong_bits = harness.build(Vec::new(), 0);
    wrong_bits.header.bits = 0x1f00_ffff;
    let outcome = harness
        .chain
        .connect_block(&wrong_bits, harness.now())
        .expect_err("bits");
    assert_eq!(outcome.reason, "bad-diffbits");
}

#[test]
fn double_spend_inside_a_block_is_rejected() {
    let mut harness = Harness::new();
    for _ in 0..101 {
        harness.mine(Vec::new(), 0);
    }
    let prevout = harness.coinbase_outpoint(1);
    let value = harness.coinbase_value(1);
    let first = spend_tx(&[prevout], &[value - 10_000], u32::MAX, 4);
    let second = spend_tx(&[prevout], &[value - 20_000], u32::MAX, 5);
    let block = harness.build(vec![first, second], 30_000);
    let outcome = harness
        .chain
        .connect_block(&block, harness.now())
        .expect_err("double spend");
    assert_eq!(outcome.class, RejectClass::Consensus);
    assert_eq!(outcome.reason, "bad-txns-inputs-missingorspent");
}

#[test]
fn orphan_waits_for_parent_and_block_trims_ancestry() {
    let mut harness = Harness::new();
    for _ in 0..101 {
        harness.mine(Vec::new(), 0);
    }

    let value = harness.coinbase_value(1);
    let parent = spend_tx(
        &[harness.coinbase_outpoint(1)],
        &[value / 2, value / 2 - 10_000],
        u32::MAX,
        6,
    );
    let parent_txid = parent.txid();
    let child = spend_tx(
        &[OutPoint::new(parent_txid, 0)],
        &[value / 2 - 10_000],
        u32::MAX,
        7,
    );
    let child_txid = child.txid();

    let outcome = harness
        .chain
        .accept_to_memory_pool(child, harness.now())
        .expect_err("orphan");
    assert_eq!(outcome.class, RejectClass::Orphan);
    assert_eq!(outcome.reason, "missing-inputs");
    let (pool_len, orphans) = harness
        .chain
        .with_mempool(|pool| (pool.len(), pool.orphans().len()))
        .expect("pool");
    assert_eq!((pool_len, orphans), (0, 1));

    let accepted = harness
        .chain
        .accept_to_memory_pool(parent.clone(), harness.now())
        .expect("parent");
    assert_eq!(accepted.txid, parent_txid);
    assert_eq!(accepted.fee, 10_000);
    assert_eq!(accepted.orphans_accepted, vec![child_txid]);
    let ancestors = harness
        .chain
        .with_mempool(|pool| pool.get(&child_txid).map(|entry| entry.count_with_ancestors()))
        .expect("pool");
    assert_eq!(ancestors, Some(2));
    assert_eq!(
        *harness.recorder.accepted.lock().expect("accepted"),
        vec![parent_txid, child_txid]
    );

    harness.mine(vec![parent], 10_000);
    let (has_parent, child_ancestors) = harness
        .chain
        .with_mempool(|pool| {
            (
                pool.contains(&parent_txid),
                pool.get(&child_txid).map(|entry| entry.count_with_ancestors()),
            )
        })
        .expect("pool");
    assert!(!has_parent);
    assert_eq!(child_ancestors, Some(1));
    assert!(harness
        .recorder
        .removed
        .lock()
        .expect("removed")
        .contains(&(parent_txid, RemovalReason::Block)));
}

#[test]
fn replacement_needs_more_fee_than_it_evicts() {
    let mut harness = Harness::new();
    for _ in 0..101 {
        harness.mine(Vec::new(), 0);
    }
    let prevout = harness.coinbase_outpoint(1);
    let value = harness.coinbase_value(1);

    let original = spend_tx(
        &[prevout],
        &[value / 2, value / 2 - 20_000],
        0xffff_fffd,
        8,
    );
    let original_txid = original.txid();
    harness
        .chain
        .accept_to_memory_pool(original, harness.now())
        .expect("original");

    let cheaper = spend_tx(&[prevout], &[value - 15_000], 0xffff_fffd, 9);
    let outcome = harness
        .chain
        .accept_to_memory_pool(cheaper, harness.now())
        .expect_err("lower absolute fee");
    assert_eq!(outcome.class, RejectClass::Policy);
    assert_eq!(outcome.reason, "txn-mempool-conflict");

    let richer = spend_tx(&[prevout], &[value - 30_000], 0xffff_fffd, 10);
    let richer_txid = richer.txid();
    let accepted = harness
        .chain
        .accept_to_memory_pool(richer, harness.now())
        .expect("replacement");
    assert_eq!(accepted.replaced, vec![original_txid]);
    let (has_original, has_richer) = harness
        .chain
        .with_mempool(|pool| (pool.contains(&original_txid), pool.contains(&richer_txid)))
        .expect("pool");
    assert!(!has_original);
    assert!(has_richer);
}

#[test]
fn pool_rejects_coinbase_and_immature_spends() {
    let mut harness = Harness::new();
    harness.mine(Vec::new(), 0);

    let outcome = harness
        .chain
        .accept_to_memory_pool(coinbase_tx(9, 1_000, 2), harness.now())
        .expect_err("coinbase");
    assert_eq!(outcome.class, RejectClass::Consensus);
    assert_eq!(outcome.reason, "coinbase");

    let spend = spend_tx(
        &[harness.coinbase_outpoint(1)],
        &[harness.coinbase_value(1) - 10_000],
        u32::MAX,
        3,
    );
    let outcome = harness
        .chain
        .accept_to_memory_pool(spend, harness.now())
        .expect_err("immature");
    assert_eq!(outcome.class, RejectClass::Consensus);
    assert_eq!(outcome.reason, "bad-txns-premature-spend-of-coinbase");
}
