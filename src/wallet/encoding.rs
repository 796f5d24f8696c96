// Address encodings for derived public keys

use bech32::{u5, ToBase32, Variant};
use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};

type HmacSha512 = Hmac<Sha512>;

/// HASH160 = RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let rip = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&rip);
    out
}

/// Witness v0 keyhash address (P2WPKH) for a compressed secp256k1 public key.
pub fn p2wpkh_address(hrp: &str, compressed_pubkey: &[u8; 33]) -> Result<String, bech32::Error> {
    let program = hash160(compressed_pubkey);
    let mut data = vec![u5::try_from_u8(0)?];
    data.extend(program.to_base32());
    bech32::encode(hrp, data, Variant::Bech32)
}

/// Solana account address: the raw Ed25519 public key in base58.
pub fn solana_address(pubkey: &[u8; 32]) -> String {
    bs58::encode(pubkey).into_string()
}

/// SLIP-0010 Ed25519 derivation. Only hardened children exist on this curve,
/// so every element of `path` is hardened here. Returns the 32-byte secret.
pub fn slip10_ed25519(seed: &[u8], path: &[u32]) -> [u8; 32] {
    let (mut key, mut chain) = hmac_split(b"ed25519 seed", &[seed]);
    for index in path {
        let hardened = (index | 0x8000_0000).to_be_bytes();
        let next = hmac_split(&chain, &[&[0u8][..], &key[..], &hardened[..]]);
        key = next.0;
        chain = next.1;
    }
    key
}

fn hmac_split(key: &[u8], parts: &[&[u8]]) -> ([u8; 32], [u8; 32]) {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha512::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => unreachable!("HMAC-SHA512 takes variable-length keys"),
    };
    for p in parts {
        mac.update(p);
    }
    let out = mac.finalize().into_bytes();
    let mut left = [0u8; 32];
    let mut right = [0u8; 32];
    left.copy_from_slice(&out[..32]);
    right.copy_from_slice(&out[32..]);
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slip10_reference_vector() {
        // SLIP-0010 ed25519 test vector 1
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(
            hex::encode(slip10_ed25519(&seed, &[])),
            "2b4be7f19ee27bbf30c667b642d5f4aa69fd169872f8fc3059c08ebae2eb19e7"
        );
        assert_eq!(
            hex::encode(slip10_ed25519(&seed, &[0])),
            "68e0fe46dfb67e368c75379acec591dad19df3cde26e63b93a8e704f1dade7a3"
        );
    }

    #[test]
    fn p2wpkh_uses_requested_hrp() {
        let mut pk = [2u8; 33];
        pk[1] = 0x79;
        let btc = p2wpkh_address("bc", &pk).unwrap();
        let ltc = p2wpkh_address("ltc", &pk).unwrap();
        assert!(btc.starts_with("bc1q"));
        assert!(ltc.starts_with("ltc1q"));
        // 20-byte program: hrp + '1' + 33 data chars + 6 checksum chars
        assert_eq!(btc.len(), 2 + 1 + 33 + 6);
    }
}
