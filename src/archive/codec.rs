use extended_tea::XTEA;
use thiserror::Error;

/// Key used for encrypted archive entries, zero padded to 16 bytes.
pub const ENTRY_KEY: &[u8] = b"aQj8CScgNP4VsfXK";

const BLOCK_LEN: usize = 8;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key too long: {0} bytes")]
    KeyTooLong(usize),
    #[error("decompressed size mismatch (expected {expected}, got {actual})")]
    SizeMismatch { expected: usize, actual: usize },
}

pub struct EntryCodec {}

impl EntryCodec {
    /// Decode an entry payload as stored in a data file.
    ///
    /// # Arguments
    ///
    /// * `input` - The raw bytes of the entry
    /// * `encrypted` - Whether the bytes are XTEA encrypted
    /// * `compressed` - Whether the bytes are an LZ4 block
    /// * `size` - The uncompressed size recorded in the index
    pub fn decode<T: AsRef<[u8]>>(
        input: T,
        encrypted: bool,
        compressed: bool,
        size: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let mut buf = input.as_ref().to_vec();

        if encrypted {
            xtea_ctr(&mut buf, ENTRY_KEY)?;
        }

        if !compressed {
            return Ok(buf);
        }

        decompress_lz4(&buf, size)
    }

    /// Encode a payload the way the archive stores it. Returns the stored bytes and
    /// whether they ended up compressed.
    pub fn encode<T: AsRef<[u8]>>(
        input: T,
        encrypt: bool,
        compress: bool,
    ) -> Result<(Vec<u8>, bool), CodecError> {
        let input = input.as_ref();
        let mut compressed = false;
        let mut buf = if compress {
            let packed = lz4::block::compress(input, None, false)?;
            // Incompressible payloads are stored raw.
            if packed.len() < input.len() {
                compressed = true;
                packed
            } else {
                input.to_vec()
            }
        } else {
            input.to_vec()
        };

        if encrypt {
            xtea_ctr(&mut buf, ENTRY_KEY)?;
        }

        Ok((buf, compressed))
    }
}

/// Decompress an LZ4 raw block into exactly `size` bytes.
pub fn decompress_lz4(input: &[u8], size: usize) -> Result<Vec<u8>, CodecError> {
    let output = lz4::block::decompress(input, Some(size as i32))?;
    if output.len() != size {
        return Err(CodecError::SizeMismatch {
            expected: size,
            actual: output.len(),
        });
    }
    Ok(output)
}

/// XTEA in counter mode. Encryption and decryption are the same operation.
///
/// The counter starts at zero and is enciphered as the pair `(hi, lo)`; the keystream
/// block is laid out little-endian over the data, including the trailing partial block.
pub fn xtea_ctr(data: &mut [u8], key: &[u8]) -> Result<(), CodecError> {
    if key.len() > 16 {
        return Err(CodecError::KeyTooLong(key.len()));
    }

    let mut padded = [0u8; 16];
    padded[..key.len()].copy_from_slice(key);

    let mut words = [0u32; 4];
    for (word, chunk) in words.iter_mut().zip(padded.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    let xtea = XTEA::new(&words);

    for (counter, block) in data.chunks_mut(BLOCK_LEN).enumerate() {
        let counter = counter as u64;
        let input = [(counter >> 32) as u32, counter as u32];
        let mut output = [0u32; 2];
        xtea.encipher(&input, &mut output);

        let keystream = (((output[0] as u64) << 32) | output[1] as u64).to_le_bytes();
        for (b, k) in block.iter_mut().zip(keystream.iter()) {
            *b ^= k;
        }
    }

    Ok(())
}
