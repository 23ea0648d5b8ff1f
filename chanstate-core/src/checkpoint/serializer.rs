use super::*;

const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4;
const LENGTH_PREFIX_LEN: usize = 4;

/// Byte format of a channel-state stream.
///
/// ```text
/// [version: u32 BE]                header, once per stream
/// [len: u32 BE][len bytes]         one chunk per written buffer
/// ```
///
/// Handles record the offset of each chunk, so chunks of different channels may interleave.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelStateSerializer;

impl ChannelStateSerializer {
    pub fn write_header(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    }

    /// Append one chunk and return the number of bytes written.
    pub fn write_data(&self, out: &mut Vec<u8>, data: &[u8]) -> usize {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(data);
        LENGTH_PREFIX_LEN + data.len()
    }

    pub fn read_header(&self, stream: &[u8]) -> Result<()> {
        let header: [u8; HEADER_LEN] = stream
            .get(..HEADER_LEN)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| anyhow!("channel state stream too short for header"))?;
        let version = u32::from_be_bytes(header);
        if version != FORMAT_VERSION {
            return Err(anyhow!(
                "unsupported channel state format version {version} (expected {FORMAT_VERSION})"
            ));
        }
        Ok(())
    }

    /// Chunk payload starting at `offset`.
    pub fn read_data<'a>(&self, stream: &'a [u8], offset: u64) -> Result<&'a [u8]> {
        let start = usize::try_from(offset).context("chunk offset out of range")?;
        let prefix: [u8; LENGTH_PREFIX_LEN] = stream
            .get(start..start + LENGTH_PREFIX_LEN)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| anyhow!("truncated chunk length at offset {offset}"))?;
        let len = u32::from_be_bytes(prefix) as usize;
        let data_start = start + LENGTH_PREFIX_LEN;
        stream
            .get(data_start..data_start + len)
            .ok_or_else(|| anyhow!("truncated chunk of {len} bytes at offset {offset}"))
    }

    /// Payloads of all chunks of one channel, in write order.
    pub fn read_channel(&self, stream: &[u8], offsets: &[u64]) -> Result<Vec<Vec<u8>>> {
        self.read_header(stream)?;
        offsets
            .iter()
            .map(|offset| self.read_data(stream, *offset).map(<[u8]>::to_vec))
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/serializer_tests.rs"]
mod tests;
