//! NIP implementations: encrypted payloads, bech32 entities, gift wraps
//! and remote signing.

pub mod nip04;
pub mod nip19;
pub mod nip44;
pub mod nip46;
pub mod nip59;

use k256::{PublicKey as K256PublicKey, SecretKey as K256SecretKey};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::types::event::{PublicKey, SecretKey};

/// Raw x-coordinate of the ECDH shared point, unhashed, as both NIP-04
/// and NIP-44 consume it.
///
/// Nostr public keys are x-only; the full point is recovered by trying
/// the even then the odd y parity.
pub(crate) fn ecdh_x_coordinate(
    secret_key: &SecretKey,
    public_key: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>> {
    let sk = K256SecretKey::from_slice(secret_key.as_bytes())
        .map_err(|_| Error::crypto("invalid secret key scalar"))?;

    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(public_key.as_bytes());
    let pk = K256PublicKey::from_sec1_bytes(&compressed)
        .or_else(|_| {
            compressed[0] = 0x03;
            K256PublicKey::from_sec1_bytes(&compressed)
        })
        .map_err(|_| Error::crypto("public key is not on the curve"))?;

    let shared = k256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());

    let mut x = Zeroizing::new([0u8; 32]);
    x.copy_from_slice(shared.raw_secret_bytes());
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::Keys;

    #[test]
    fn ecdh_is_symmetric() {
        let a = Keys::generate();
        let b = Keys::generate();
        let ab = ecdh_x_coordinate(a.secret_key(), &b.public_key()).unwrap();
        let ba = ecdh_x_coordinate(b.secret_key(), &a.public_key()).unwrap();
        assert_eq!(*ab, *ba);
    }
}
