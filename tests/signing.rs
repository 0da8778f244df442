mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::*;
use percent_encoding::percent_decode_str;
use picky::hash::HashAlgorithm;
use picky::signature::SignatureAlgorithm;
use rdg_token::token::sign_machine_token;
use rdg_token::{escape_data_string, Endpoint, Error, ErrorKind, MachineToken, SigningCertificate, TokenSigner};
use time::OffsetDateTime;

fn now() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
}

/// Splits a signed token into the signed text and the four signature fields.
fn split_token(token: &str) -> (&str, Vec<&str>) {
    let (machine_token, signature) = token.split_once("&Signature=").unwrap();

    (machine_token, signature.split('|').collect())
}

fn verify(certificate: &SigningCertificate, machine_token: &str, escaped_signature: &str) -> bool {
    let signature = percent_decode_str(escaped_signature).decode_utf8().unwrap();
    let signature = STANDARD.decode(signature.as_bytes()).unwrap();

    SignatureAlgorithm::RsaPkcs1v15(HashAlgorithm::SHA2_256)
        .verify(certificate.certificate().public_key(), machine_token.as_bytes(), &signature)
        .is_ok()
}

#[test]
fn loads_certificate_from_pkcs12() {
    let certificate = SigningCertificate::from_pkcs12(SIGNING_PFX, SIGNING_PFX_PASSWORD).unwrap();

    assert_eq!(certificate.thumbprint(), SIGNING_THUMBPRINT);
}

#[test]
fn pkcs12_with_wrong_password_is_rejected() {
    let error = SigningCertificate::from_pkcs12(SIGNING_PFX, "wrong-password").unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Signing);
}

#[test]
fn loads_certificate_from_secret_envelope() {
    let certificate = SigningCertificate::from_secret_envelope(SIGNING_SECRET).unwrap();

    assert_eq!(certificate.thumbprint(), SIGNING_THUMBPRINT);
    assert_eq!(format!("{certificate:?}"), format!("SigningCertificate {{ thumbprint: \"{SIGNING_THUMBPRINT}\", .. }}"));
}

#[test]
fn malformed_envelopes_are_rejected() {
    for secret in ["not base64!", "bm90IGpzb24=", "eyJkYXRhIjoiISEhIiwicGFzc3dvcmQiOiJ4In0="] {
        let error = SigningCertificate::from_secret_envelope(secret).unwrap_err();

        assert!(matches!(error, Error::InvalidCertificate(_)), "{secret}: {error:?}");
    }
}

#[test]
fn mismatched_key_is_rejected() {
    let other_key = picky::key::PrivateKey::generate_rsa(2048).unwrap();

    let error = SigningCertificate::new(signing_cert(), &other_key).unwrap_err();

    assert!(matches!(error, Error::MissingPrivateKey(_)));
}

#[test]
fn signature_matches_openssl() {
    init_tracing();

    let certificate = signing_certificate();
    let endpoint = Endpoint::new("vm1.example.com", 3389);

    let token = TokenSigner::new(None).sign_at(&certificate, &endpoint, now()).unwrap();

    let expected = format!(
        "Host=vm1.example.com&Port=3389&ExpiresOn=1700000060&Signature=1|SHA256|{SIGNING_THUMBPRINT}|{}",
        escape_data_string(VM1_SIGNATURE_BASE64.trim())
    );

    assert_eq!(token.as_str(), expected);
    assert_eq!(token.machine_token(), "Host=vm1.example.com&Port=3389&ExpiresOn=1700000060");
    assert_eq!(token.expires_on(), 1_700_000_060);
}

#[test]
fn signature_fields_are_well_formed() {
    let certificate = signing_certificate();
    let token = TokenSigner::new(Some("00:05:00".to_owned()))
        .sign_at(&certificate, &Endpoint::new("lb1.example.com", 50001), now())
        .unwrap();

    let (machine_token, fields) = split_token(token.as_str());

    assert_eq!(machine_token, "Host=lb1.example.com&Port=50001&ExpiresOn=1700000300");
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[0], "1");
    assert_eq!(fields[1], "SHA256");
    assert_eq!(fields[2], SIGNING_THUMBPRINT);
    assert!(fields[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    assert!(!fields[3].contains(['+', '/', '=']), "signature is not escaped: {}", fields[3]);
    assert!(verify(&certificate, machine_token, fields[3]));
}

#[test]
fn escaped_openssl_signature_uses_percent_encoding() {
    let escaped = escape_data_string(VM1_SIGNATURE_BASE64.trim());

    assert!(escaped.contains("%2B"));
    assert!(escaped.contains("%2F"));
    assert!(escaped.ends_with("%3D%3D"));
}

#[test]
fn signing_is_deterministic() {
    let certificate = signing_certificate();
    let machine_token = MachineToken::new(&Endpoint::new("vm1.example.com", 3389), 1_700_000_060);

    let first = sign_machine_token(&certificate, &machine_token).unwrap();
    let second = sign_machine_token(&certificate, &machine_token).unwrap();

    assert_eq!(first, second);
}

#[test]
fn tampered_token_fails_verification() {
    let certificate = signing_certificate();
    let token = TokenSigner::new(None)
        .sign_at(&certificate, &Endpoint::new("vm1.example.com", 3389), now())
        .unwrap();

    let (machine_token, fields) = split_token(token.as_str());
    assert!(verify(&certificate, machine_token, fields[3]));

    let tampered = machine_token.replace("Port=3389", "Port=3390");
    assert!(!verify(&certificate, &tampered, fields[3]));
}

#[test]
fn non_ascii_host_is_rejected() {
    let certificate = signing_certificate();

    let error = TokenSigner::new(None)
        .sign_at(&certificate, &Endpoint::new("vm1.exämple.com", 3389), now())
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Signing);
    assert!(matches!(error, Error::NonAsciiToken { host } if host == "vm1.exämple.com"));
}

#[test]
fn invalid_lifetime_fails_signing() {
    let certificate = signing_certificate();

    let error = TokenSigner::new(Some("-00:01:00".to_owned()))
        .sign_at(&certificate, &Endpoint::new("vm1.example.com", 3389), now())
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Configuration);
}
