use lccd_consensus::params::{consensus_params, Network, PowType};
use lccd_pow::difficulty::{
    block_proof, compact_to_target, hash_meets_target, target_to_compact, u256_to_compact,
};
use lccd_pow::validation::check_proof_of_work;
use primitive_types::U256;

#[test]
fn compact_to_target_roundtrip() {
    let bits = 0x1d00ffff;
    let target = compact_to_target(bits).expect("target");
    let back = target_to_compact(&target);
    assert_eq!(back, bits);
}

#[test]
fn compact_target_layout() {
    let bits = 0x207fffff;
    let target = compact_to_target(bits).expect("target");
    assert!(target[..29].iter().all(|b| *b == 0));
    assert_eq!(target[29], 0xff);
    assert_eq!(target[30], 0xff);
    assert_eq!(target[31], 0x7f);
}

#[test]
fn hash_meets_target_cmp() {
    let target = [0x10u8; 32];
    let smaller = [0x00u8; 32];
    let larger = [0xffu8; 32];
    assert!(hash_meets_target(&smaller, &target));
    assert!(!hash_meets_target(&larger, &target));
}

#[test]
fn compact_sign_bit_moves_into_exponent() {
    // 0x80 in the top mantissa byte would read as negative
    assert_eq!(u256_to_compact(U256::from(0x80u64)), 0x0200_8000);
    assert_eq!(u256_to_compact(U256::zero()), 0);
}

#[test]
fn block_proof_of_minimum_target() {
    let proof = block_proof(0x1d00ffff).expect("proof");
    assert_eq!(proof, U256::from(0x0001_0001_0001u64));
}

#[test]
fn proof_of_work_uses_highest_type_limit() {
    let params = consensus_params(Network::Mainnet);
    let minotaurx_limit = target_to_compact(params.pow_type_limit(PowType::MinotaurX));
    // easier than the sha256d floor, still allowed for the minotaurx type
    assert!(check_proof_of_work(&[0u8; 32], minotaurx_limit, &params));
    let above = u256_to_compact(
        U256::from_little_endian(params.pow_type_limit(PowType::MinotaurX)) << 1,
    );
    assert!(!check_proof_of_work(&[0u8; 32], above, &params));
}
