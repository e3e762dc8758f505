use lccd_consensus::money::Amount;
use lccd_mempool::{AncestorLimits, MempoolConfig, MempoolEntry, MempoolErrorKind, TxMemPool};
use lccd_primitives::outpoint::OutPoint;
use lccd_primitives::transaction::{Transaction, TxIn, TxOut};

fn spend(prevout: OutPoint, sequence: u32, outputs: usize) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout,
            script_sig: vec![0x01, 0x01],
            sequence,
        }],
        vout: (0..outputs)
            .map(|index| TxOut::new(1_000 + index as Amount, vec![0x51]))
            .collect(),
        lock_time: 0,
    }
}

fn admit(pool: &mut TxMemPool, tx: Transaction, fee: Amount) -> MempoolEntry {
    let entry = MempoolEntry::new(tx, fee, 0, 1, false);
    let ancestors = pool
        .calculate_mempool_ancestors(&entry, &AncestorLimits::unlimited())
        .expect("ancestors");
    pool.add_unchecked(entry.clone(), &ancestors);
    entry
}

#[test]
fn lower_absolute_fee_is_rejected_even_at_higher_rate() {
    let mut pool = TxMemPool::new(MempoolConfig::default());
    let funding = OutPoint::new([3u8; 32], 0);
    let original = admit(&mut pool, spend(funding, 0, 20), 10_000);

    let replacement = MempoolEntry::new(spend(funding, 0, 1), 9_000, 0, 1, false);
    assert!(replacement.fee_rate() > original.fee_rate());

    let conflicts = pool.conflicts_of(&replacement.tx);
    let err = pool
        .check_replacement(&replacement, &conflicts)
        .expect_err("lower fee");
    assert_eq!(err.kind, MempoolErrorKind::Conflict);
    assert_eq!(err.reason, "txn-mempool-conflict");
    assert!(pool.contains(&original.txid));
}

#[test]
fn higher_fee_and_rate_replaces_original() {
    let mut pool = TxMemPool::new(MempoolConfig::default());
    let funding = OutPoint::new([3u8; 32], 0);
    let original = admit(&mut pool, spend(funding, 0, 1), 10_000);
    let child = admit(&mut pool, spend(OutPoint::new(original.txid, 0), 0, 1), 1_000);

    let replacement = MempoolEntry::new(spend(funding, 0, 2), 20_000, 0, 1, false);
    let conflicts = pool.conflicts_of(&replacement.tx);
    let evicted = pool
        .check_replacement(&replacement, &conflicts)
        .expect("replaceable");
    assert_eq!(evicted.len(), 2);

    let removed = pool.remove_replaced(&evicted);
    assert_eq!(removed.len(), 2);
    let ancestors = pool
        .calculate_mempool_ancestors(&replacement, &AncestorLimits::unlimited())
        .expect("ancestors");
    pool.add_unchecked(replacement.clone(), &ancestors);

    assert!(!pool.contains(&original.txid));
    assert!(!pool.contains(&child.txid));
    assert_eq!(pool.spender(&funding), Some(replacement.txid));
}

#[test]
fn final_sequence_without_signalling_ancestor_is_not_replaceable() {
    let mut pool = TxMemPool::new(MempoolConfig::default());
    let funding = OutPoint::new([5u8; 32], 0);
    let original = admit(&mut pool, spend(funding, u32::MAX, 1), 1_000);
    assert!(!pool.signals_replaceable(&original.txid));

    let replacement = MempoolEntry::new(spend(funding, u32::MAX, 1), 50_000, 0, 1, false);
    let conflicts = pool.conflicts_of(&replacement.tx);
    assert!(pool.check_replacement(&replacement, &conflicts).is_err());
}

#[test]
fn signalling_is_inherited_from_ancestors() {
    let mut pool = TxMemPool::new(MempoolConfig::default());
    let parent = admit(&mut pool, spend(OutPoint::new([6u8; 32], 0), 0, 1), 1_000);
    let child = admit(&mut pool, spend(OutPoint::new(parent.txid, 0), u32::MAX, 1), 1_000);
    assert!(pool.signals_replaceable(&child.txid));
}

#[test]
fn replacement_cannot_spend_what_it_evicts() {
    let mut pool = TxMemPool::new(MempoolConfig::default());
    let funding = OutPoint::new([8u8; 32], 0);
    let original = admit(&mut pool, spend(funding, 0, 2), 1_000);
    let child = admit(&mut pool, spend(OutPoint::new(original.txid, 0), 0, 1), 1_000);

    // replaces the original while spending one of its outputs
    let mut tx = spend(funding, 0, 1);
    tx.vin.push(TxIn {
        prevout: OutPoint::new(original.txid, 1),
        script_sig: Vec::new(),
        sequence: 0,
    });
    let replacement = MempoolEntry::new(tx, 100_000, 0, 1, false);
    let conflicts = pool.conflicts_of(&replacement.tx);
    assert!(conflicts.contains(&original.txid));
    assert!(!conflicts.contains(&child.txid));
    let err = pool
        .check_replacement(&replacement, &conflicts)
        .expect_err("spends evicted");
    assert!(err.detail.starts_with("spends conflicting"), "{err}");
}
