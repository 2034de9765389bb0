//! End-to-end container tests: encrypt a source, reassemble the stream, and
//! check round-trip, tamper detection, ordering, truncation, and size accounting.

use proptest::prelude::*;
use qdenc_crypto::chunk::RECORD_FRAMING_LEN;
use qdenc_crypto::format::{chunk_count, ContainerFormat};
use qdenc_crypto::{
    decrypt, decrypt_to_vec, detect_format, encrypt, estimate_overhead, read_header,
    CryptoError, DecryptOptions, EncryptOptions, FileSource, Segment,
};
use secrecy::SecretString;

const MIB: usize = 1024 * 1024;

fn options(chunk_size: usize) -> EncryptOptions {
    EncryptOptions {
        chunk_size,
        iterations: 1000,
        ..EncryptOptions::default()
    }
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

/// Encrypt and return the header followed by each chunk record as separate buffers.
fn encrypt_segments(data: &[u8], password: &str, options: &EncryptOptions) -> Vec<Vec<u8>> {
    let container = encrypt(data, &SecretString::from(password), options).unwrap();
    container
        .stream
        .map(|segment| segment.unwrap().into_bytes())
        .collect()
}

fn encrypt_bytes(data: &[u8], password: &str, options: &EncryptOptions) -> Vec<u8> {
    encrypt_segments(data, password, options).concat()
}

fn decrypt_all(encrypted: &[u8], password: &str, file_id: &str) -> Result<Vec<u8>, CryptoError> {
    decrypt_to_vec(
        encrypted,
        &SecretString::from(password),
        &DecryptOptions::default().with_file_id(file_id),
    )
}

/// Decrypt chunk by chunk, returning how many chunks succeeded and the first error.
fn decrypt_until_error(encrypted: &[u8], password: &str, file_id: &str) -> (usize, Option<CryptoError>) {
    let container = match decrypt(
        encrypted,
        &SecretString::from(password),
        &DecryptOptions::default().with_file_id(file_id),
    ) {
        Ok(container) => container,
        Err(e) => return (0, Some(e)),
    };
    let mut ok = 0;
    for chunk in container.stream {
        match chunk {
            Ok(_) => ok += 1,
            Err(e) => return (ok, Some(e)),
        }
    }
    (ok, None)
}

#[test]
fn roundtrip_at_chunk_boundaries() {
    let chunk = 64;
    for (len, chunks) in [
        (0, 1),
        (1, 1),
        (chunk - 1, 1),
        (chunk, 1),
        (chunk + 1, 2),
        (chunk * 7, 7),
        (chunk * 7 + 3, 8),
    ] {
        let data = make_data(len);
        let opts = options(chunk).with_file_id("boundary.bin");
        let segments = encrypt_segments(&data, "pw", &opts);
        assert_eq!(segments.len(), chunks + 1, "len {len}");
        assert_eq!(chunk_count(len as u64, chunk).unwrap() as usize, chunks);

        let encrypted = segments.concat();
        assert_eq!(read_header(encrypted.as_slice()).unwrap().total_chunks as usize, chunks);
        assert_eq!(decrypt_all(&encrypted, "pw", "boundary.bin").unwrap(), data, "len {len}");
    }
}

#[test]
fn two_and_a_half_mib_scenario() {
    let data = make_data(5 * MIB / 2);
    let container = encrypt(data.as_slice(), &SecretString::from("pw"), &options(MIB)).unwrap();
    assert_eq!(container.total_chunks, 3);
    assert_eq!(container.plaintext_size, data.len() as u64);

    let mut encrypted = Vec::new();
    container.stream.write_to(&mut encrypted).unwrap();

    let decrypted = decrypt(encrypted.as_slice(), &SecretString::from("pw"), &DecryptOptions::default())
        .unwrap();
    assert_eq!(decrypted.header.total_chunks, 3);
    let chunks: Vec<_> = decrypted.stream.collect::<Result<_, _>>().unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].data.len(), MIB);
    assert_eq!(chunks[1].data.len(), MIB);
    assert_eq!(chunks[2].data.len(), MIB / 2);

    let reassembled: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
    assert_eq!(reassembled, data);
}

#[test]
fn wrong_password_fails_integrity() {
    let encrypted = encrypt_bytes(&make_data(300), "right", &options(100));
    let (ok, err) = decrypt_until_error(&encrypted, "wrong", "");
    assert_eq!(ok, 0);
    assert!(matches!(err, Some(CryptoError::Integrity(_))));
}

#[test]
fn empty_password_roundtrip() {
    let data = make_data(10);
    let encrypted = encrypt_bytes(&data, "", &options(4));
    assert_eq!(decrypt_all(&encrypted, "", "").unwrap(), data);
    assert!(matches!(decrypt_all(&encrypted, " ", ""), Err(CryptoError::Integrity(_))));
}

#[test]
fn wrong_file_id_fails_integrity() {
    let opts = options(100).with_file_id("invoice.pdf");
    let encrypted = encrypt_bytes(&make_data(150), "pw", &opts);
    assert!(matches!(decrypt_all(&encrypted, "pw", "invoice.PDF"), Err(CryptoError::Integrity(_))));
    assert!(matches!(decrypt_all(&encrypted, "pw", ""), Err(CryptoError::Integrity(_))));
    assert!(decrypt_all(&encrypted, "pw", "invoice.pdf").is_ok());
}

#[test]
fn bit_flips_in_every_chunk_fail_at_that_chunk() {
    let chunk = 32;
    let segments = encrypt_segments(&make_data(chunk * 4), "pw", &options(chunk));
    let records = segments.len() - 1;

    for target in 0..records {
        let record_len = segments[target + 1].len();
        // nonce bytes, first ciphertext byte, last tag byte
        let positions = [5, 5 + 11, RECORD_FRAMING_LEN, record_len - 1];
        for pos in positions {
            for bit in [0u8, 7] {
                let mut tampered = segments.clone();
                tampered[target + 1][pos] ^= 1 << bit;
                let (ok, err) = decrypt_until_error(&tampered.concat(), "pw", "");
                assert_eq!(ok, target, "chunk {target} byte {pos}");
                assert!(
                    matches!(err, Some(CryptoError::Integrity(_))),
                    "chunk {target} byte {pos}: {err:?}"
                );
            }
        }
    }
}

#[test]
fn header_total_chunks_tamper_fails_integrity() {
    let mut encrypted = encrypt_bytes(&make_data(100), "pw", &options(40));
    let header = read_header(encrypted.as_slice()).unwrap();
    let pos = header.header_len - 12;
    // 3 -> 2: the first chunk's AAD no longer matches
    encrypted[pos..pos + 4].copy_from_slice(&2u32.to_be_bytes());
    let (ok, err) = decrypt_until_error(&encrypted, "pw", "");
    assert_eq!(ok, 0);
    assert!(matches!(err, Some(CryptoError::Integrity(_))));
}

#[test]
fn header_plaintext_size_tamper_detected() {
    let mut encrypted = encrypt_bytes(&make_data(100), "pw", &options(40));
    let header = read_header(encrypted.as_slice()).unwrap();
    let pos = header.header_len - 8;
    encrypted[pos..pos + 8].copy_from_slice(&99u64.to_be_bytes());
    let (ok, err) = decrypt_until_error(&encrypted, "pw", "");
    assert_eq!(ok, 2);
    assert!(matches!(err, Some(CryptoError::Integrity(_))));
}

#[test]
fn salt_tamper_fails_integrity() {
    let mut encrypted = encrypt_bytes(&make_data(10), "pw", &options(40));
    encrypted[9] ^= 0x01;
    assert!(matches!(decrypt_all(&encrypted, "pw", ""), Err(CryptoError::Integrity(_))));
}

#[test]
fn swapped_records_fail_with_order_error() {
    let mut segments = encrypt_segments(&make_data(40 * 3), "pw", &options(40));
    segments.swap(2, 3);
    let (ok, err) = decrypt_until_error(&segments.concat(), "pw", "");
    assert_eq!(ok, 1, "chunk 0 still decrypts; the swap is caught at position 1");
    assert!(matches!(err, Some(CryptoError::Order { expected: 1, found: 2 })));
}

#[test]
fn relabelled_swap_fails_integrity() {
    let mut segments = encrypt_segments(&make_data(40 * 3), "pw", &options(40));
    segments.swap(1, 2);
    // rewrite the index fields so the order check passes
    segments[1][0..4].copy_from_slice(&0u32.to_be_bytes());
    segments[2][0..4].copy_from_slice(&1u32.to_be_bytes());
    let (ok, err) = decrypt_until_error(&segments.concat(), "pw", "");
    assert_eq!(ok, 0);
    assert!(matches!(err, Some(CryptoError::Integrity(_))));
}

#[test]
fn dropped_final_record_is_incomplete() {
    let mut segments = encrypt_segments(&make_data(40 * 3), "pw", &options(40));
    segments.pop();
    let (ok, err) = decrypt_until_error(&segments.concat(), "pw", "");
    assert_eq!(ok, 2);
    assert!(matches!(err, Some(CryptoError::IncompleteData { .. })));
}

#[test]
fn truncated_mid_record_is_incomplete() {
    let encrypted = encrypt_bytes(&make_data(100), "pw", &options(40));
    let truncated = &encrypted[..encrypted.len() - 5];
    let (ok, err) = decrypt_until_error(truncated, "pw", "");
    assert_eq!(ok, 2);
    assert!(matches!(err, Some(CryptoError::IncompleteData { .. })));
}

#[test]
fn truncated_header_is_incomplete() {
    let encrypted = encrypt_bytes(&make_data(10), "pw", &options(40));
    assert!(matches!(
        decrypt_all(&encrypted[..20], "pw", ""),
        Err(CryptoError::IncompleteData { .. })
    ));
}

#[test]
fn size_limit_aborts_before_exceeding_chunk() {
    let encrypted = encrypt_bytes(&make_data(100), "pw", &options(40));
    let opts = DecryptOptions {
        max_plaintext_bytes: Some(50),
        ..DecryptOptions::default()
    };
    let mut stream = decrypt(encrypted.as_slice(), &SecretString::from("pw"), &opts)
        .unwrap()
        .stream;
    assert_eq!(stream.next().unwrap().unwrap().data.len(), 40);
    assert!(matches!(
        stream.next(),
        Some(Err(CryptoError::SizeLimit { limit: 50 }))
    ));
    assert!(stream.next().is_none());
    assert_eq!(stream.produced(), 40);
}

#[test]
fn size_limit_at_exact_size_succeeds() {
    let data = make_data(100);
    let encrypted = encrypt_bytes(&data, "pw", &options(40));
    let opts = DecryptOptions {
        max_plaintext_bytes: Some(100),
        ..DecryptOptions::default()
    };
    let decrypted = decrypt_to_vec(encrypted.as_slice(), &SecretString::from("pw"), &opts).unwrap();
    assert_eq!(decrypted, data);
}

#[test]
fn overhead_estimate_matches_actual_output() {
    let chunk = 256;
    for len in [0usize, 1, chunk - 1, chunk, chunk + 1, chunk * 5 + 17] {
        for opts in [
            options(chunk),
            EncryptOptions {
                salt_len: 7,
                ..options(chunk)
            },
        ] {
            let estimate = estimate_overhead(len as u64, &opts).unwrap();
            let segments = encrypt_segments(&make_data(len), "pw", &opts);
            let total: usize = segments.iter().map(Vec::len).sum();

            assert_eq!(estimate.header_bytes as usize, segments[0].len(), "len {len}");
            assert_eq!(estimate.total_chunks as usize, segments.len() - 1, "len {len}");
            assert_eq!(estimate.overhead as usize, total - len, "len {len}");
        }
    }
}

#[test]
fn detect_format_on_container_and_plain_data() {
    let encrypted = encrypt_bytes(b"hello", "pw", &options(40));
    let info = detect_format(encrypted.as_slice()).unwrap();
    assert_eq!(info.format, ContainerFormat::V2);
    assert_eq!(info.version, 2);
    assert!(info.has_magic);

    let plain = detect_format(&b"hello"[..]).unwrap();
    assert_eq!(plain.format, ContainerFormat::Legacy);
    assert!(matches!(decrypt_all(b"hello, not a container", "pw", ""), Err(CryptoError::Format)));
}

#[test]
fn unsupported_version_rejected_before_decryption() {
    let mut encrypted = encrypt_bytes(b"hello", "pw", &options(40));
    encrypted[5] = 0x01;
    assert!(matches!(
        decrypt_all(&encrypted, "pw", ""),
        Err(CryptoError::UnsupportedVersion(1))
    ));
}

#[test]
fn file_source_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let plain_path = dir.path().join("plain.bin");
    let enc_path = dir.path().join("plain.bin.qdenc");
    let data = make_data(10_000);
    std::fs::write(&plain_path, &data).unwrap();

    let source = FileSource::open(&plain_path).unwrap();
    let container = encrypt(source, &SecretString::from("pw"), &options(4096).with_file_id("plain.bin"))
        .unwrap();
    assert_eq!(container.total_chunks, 3);
    let mut out = std::fs::File::create(&enc_path).unwrap();
    container.stream.write_to(&mut out).unwrap();
    drop(out);

    let source = FileSource::open(&enc_path).unwrap();
    let decrypted = decrypt_to_vec(
        source,
        &SecretString::from("pw"),
        &DecryptOptions::default().with_file_id("plain.bin"),
    )
    .unwrap();
    assert_eq!(decrypted, data);
}

#[test]
fn header_segment_matches_container_header() {
    let container = encrypt(&b"abc"[..], &SecretString::from("pw"), &options(40)).unwrap();
    let header = container.header.clone();
    let mut stream = container.stream;
    match stream.next() {
        Some(Ok(Segment::Header(bytes))) => assert_eq!(bytes, header),
        other => panic!("expected header segment, got {other:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn roundtrip_arbitrary_data(
        data in proptest::collection::vec(any::<u8>(), 0..=2048),
        chunk_size in 1usize..=512,
        file_id in "[a-z0-9._-]{0,16}",
    ) {
        let opts = options(chunk_size).with_file_id(file_id.clone());
        let encrypted = encrypt_bytes(&data, "prop-pw", &opts);
        let decrypted = decrypt_all(&encrypted, "prop-pw", &file_id).unwrap();
        prop_assert_eq!(decrypted, data);
    }

    #[test]
    fn chunk_count_formula(len in 0u64..1_000_000, chunk_size in 1usize..100_000) {
        let expected = std::cmp::max(1, (len + chunk_size as u64 - 1) / chunk_size as u64);
        prop_assert_eq!(u64::from(chunk_count(len, chunk_size).unwrap()), expected);
    }
}
