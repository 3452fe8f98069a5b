//! Known-answer tests against published AES-GCM test vectors, driven
//! through the explicit-IV entry points.

use crypto_service_engine::aes::AesEngine;

fn unhex(s: &str) -> Vec<u8> {
    assert!(s.len() % 2 == 0);
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

// GCM spec test case 1: AES-128, zero key and IV, empty plaintext.
#[test]
fn gcm_aes128_empty_plaintext_vector() {
    let key = [0u8; 16];
    let iv = [0u8; 12];

    let sealed = AesEngine::encrypt_gcm_with_iv(&[], &key, &iv, &[]).unwrap();
    assert!(sealed.ciphertext.is_empty());
    assert_eq!(sealed.tag.unwrap(), unhex("58e2fccefa7e3061367f1d57a4e7455a"));
}

// GCM spec test case 2: AES-128, one zero block.
#[test]
fn gcm_aes128_single_block_vector() {
    let key = [0u8; 16];
    let iv = [0u8; 12];
    let plaintext = [0u8; 16];

    let sealed = AesEngine::encrypt_gcm_with_iv(&plaintext, &key, &iv, &[]).unwrap();
    assert_eq!(sealed.ciphertext, unhex("0388dace60b6a392f328c2b971b2fe78"));
    assert_eq!(sealed.tag.as_ref().unwrap(), &unhex("ab6e47d42cec13bdf53a67b21257bddf"));

    let opened = AesEngine::decrypt_gcm(
        &sealed.ciphertext,
        &key,
        &iv,
        sealed.tag.as_ref().unwrap(),
        &[],
    )
    .unwrap();
    assert_eq!(opened, plaintext);
}

// GCM spec test case 13: AES-256, zero key and IV, empty plaintext.
#[test]
fn gcm_aes256_empty_plaintext_vector() {
    let key = [0u8; 32];
    let iv = [0u8; 12];

    let sealed = AesEngine::encrypt_gcm_with_iv(&[], &key, &iv, &[]).unwrap();
    assert!(sealed.ciphertext.is_empty());
    assert_eq!(sealed.tag.unwrap(), unhex("530f8afbc74536b9a963b4f1c4cb738b"));
}

// GCM spec test case 14: AES-256, one zero block.
#[test]
fn gcm_aes256_single_block_vector() {
    let key = [0u8; 32];
    let iv = [0u8; 12];
    let plaintext = [0u8; 16];

    let sealed = AesEngine::encrypt_gcm_with_iv(&plaintext, &key, &iv, &[]).unwrap();
    assert_eq!(sealed.ciphertext, unhex("cea7403d4d606b6e074ec5d3baf39d18"));
    assert_eq!(sealed.tag.as_ref().unwrap(), &unhex("d0d1c8a799996bf0265b98b5d48ab919"));

    let opened = AesEngine::decrypt_gcm(
        &sealed.ciphertext,
        &key,
        &iv,
        sealed.tag.as_ref().unwrap(),
        &[],
    )
    .unwrap();
    assert_eq!(opened, plaintext);
}

// SP 800-38A F.2.1 (CBC-AES128), first block. The padded tail differs
// from the standard's raw-block output, so only the first ciphertext
// block is pinned.
#[test]
fn cbc_aes128_first_block_vector() {
    let key = unhex("2b7e151628aed2a6abf7158809cf4f3c");
    let iv = unhex("000102030405060708090a0b0c0d0e0f");
    let plaintext = unhex("6bc1bee22e9afb109f934811e073d8c9");

    let sealed = AesEngine::encrypt_cbc_with_iv(&plaintext, &key, &iv).unwrap();
    assert_eq!(sealed.ciphertext.len(), 32);
    assert_eq!(&sealed.ciphertext[..16], unhex("7649abac8119b246cee98e9b12e9197d"));

    let opened = AesEngine::decrypt_cbc(&sealed.ciphertext, &key, &iv).unwrap();
    assert_eq!(opened, plaintext);
}
