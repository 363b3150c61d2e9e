//! Certificate chain validation against the trust root.

use shared_crypto::PublicKey;
use shared_types::{Certificate, CertificateRole, TrustRoot};

use super::{ParameterError, MAX_CHAIN_LENGTH};

fn invalid(reason: impl Into<String>) -> ParameterError {
    ParameterError::SignatureInvalid(reason.into())
}

/// Validate `chain` (leaf first) up to `trust_root` and return the leaf key.
///
/// - the leaf must carry `CertificateRole::NetworkParameters`
/// - every other link must be a CA (`Root` or `Intermediate`)
/// - each link names the next link as issuer and verifies under its key
/// - the last link is issued by, and verifies under, the trust root
pub(crate) fn verify_chain(
    trust_root: &TrustRoot,
    chain: &[Certificate],
) -> Result<PublicKey, ParameterError> {
    let leaf = chain
        .first()
        .ok_or_else(|| invalid("certificate chain is empty"))?;
    if chain.len() > MAX_CHAIN_LENGTH {
        return Err(invalid(format!(
            "certificate chain has {} links, limit is {}",
            chain.len(),
            MAX_CHAIN_LENGTH
        )));
    }
    if leaf.role != CertificateRole::NetworkParameters {
        return Err(invalid(format!(
            "certificate {} has role {:?}, not NetworkParameters",
            leaf.subject, leaf.role
        )));
    }

    let root = &trust_root.certificate;
    let root_key = root
        .public_key()
        .map_err(|e| invalid(format!("trust root key: {e}")))?;
    if root.role != CertificateRole::Root || !root.is_self_issued() {
        return Err(invalid(format!(
            "trust root {} is not a self-issued root certificate",
            root.subject
        )));
    }
    root_key
        .verify(&root.to_be_signed(), &root.signature)
        .map_err(|_| invalid(format!("trust root {} self-signature", root.subject)))?;

    for (index, certificate) in chain.iter().enumerate() {
        let (issuer_name, issuer_key) = match chain.get(index + 1) {
            Some(next) => {
                if next.role == CertificateRole::NetworkParameters {
                    return Err(invalid(format!(
                        "certificate {} is not a certificate authority",
                        next.subject
                    )));
                }
                let key = next
                    .public_key()
                    .map_err(|e| invalid(format!("certificate {} key: {e}", next.subject)))?;
                (next.subject.as_str(), key)
            }
            None => (root.subject.as_str(), root_key),
        };

        if certificate.issuer != issuer_name {
            return Err(invalid(format!(
                "certificate {} names issuer {}, expected {}",
                certificate.subject, certificate.issuer, issuer_name
            )));
        }
        issuer_key
            .verify(&certificate.to_be_signed(), &certificate.signature)
            .map_err(|_| {
                invalid(format!(
                    "signature on certificate {} does not verify under {}",
                    certificate.subject, issuer_name
                ))
            })?;
    }

    leaf.public_key()
        .map_err(|e| invalid(format!("certificate {} key: {e}", leaf.subject)))
}
