//! Gzip round-trip helpers for backend state blobs and job logs.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn uncompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_empty() {
        // Given
        let data: &[u8] = b"";

        // When
        let result = uncompress(&compress(data).unwrap()).unwrap();

        // Then
        assert_eq!(result, data);
    }

    #[test]
    fn test_round_trip_near_one_mebibyte() {
        // Given
        let data = vec![b'x'; 1_000_000];

        // When
        let result = uncompress(&compress(&data).unwrap()).unwrap();

        // Then
        assert_eq!(result, data);
    }
}
