//! Common (non-GL) commands: tokens and buckets.

use glcmd_protocol::cmd::{
    immediate_bytes, DeleteBucket, GetBucketData, GetBucketStart, Noop, SetBucketData,
    SetBucketDataImmediate, SetBucketSize, SetToken,
};

use super::Decoder;
use crate::error::CommandError;

impl Decoder {
    pub(crate) fn handle_noop(&mut self, _c: Noop, _immediate: &[u32]) -> Result<(), CommandError> {
        Ok(())
    }

    pub(crate) fn handle_set_token(&mut self, c: SetToken) -> Result<(), CommandError> {
        self.last_token = c.token;
        Ok(())
    }

    pub(crate) fn handle_set_bucket_size(&mut self, c: SetBucketSize) -> Result<(), CommandError> {
        let size = c.size as usize;
        if size > self.config.max_bucket_size {
            return Err(CommandError::invalid(format!(
                "bucket size {size} exceeds the limit of {}",
                self.config.max_bucket_size
            )));
        }
        self.buckets.set_size(c.bucket_id, size)?;
        Ok(())
    }

    pub(crate) fn handle_set_bucket_data(&mut self, c: SetBucketData) -> Result<(), CommandError> {
        let data = self.shm.read(c.shm_id, c.shm_offset, c.size as usize)?;
        self.write_bucket(c.bucket_id, c.offset, &data)
    }

    pub(crate) fn handle_set_bucket_data_immediate(
        &mut self,
        c: SetBucketDataImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let data = immediate_bytes(immediate, c.size as usize)
            .ok_or_else(|| CommandError::invalid("bucket data larger than the immediate data"))?;
        self.write_bucket(c.bucket_id, c.offset, &data)
    }

    fn write_bucket(&mut self, bucket_id: u32, offset: u32, data: &[u8]) -> Result<(), CommandError> {
        let bucket = self
            .buckets
            .get_mut(bucket_id)
            .ok_or_else(|| CommandError::invalid(format!("bucket {bucket_id} does not exist")))?;
        let start = offset as usize;
        let dst = start
            .checked_add(data.len())
            .and_then(|end| bucket.get_mut(start..end))
            .ok_or_else(|| CommandError::invalid("bucket write out of range"))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn handle_get_bucket_start(&mut self, c: GetBucketStart) -> Result<(), CommandError> {
        let bucket = self
            .buckets
            .get(c.bucket_id)
            .ok_or_else(|| CommandError::invalid(format!("bucket {} does not exist", c.bucket_id)))?;
        if self.shm.read_u32(c.result_shm_id, c.result_shm_offset)? != 0 {
            return Err(CommandError::invalid("bucket size result was not zeroed"));
        }
        let size = bucket.len() as u32;
        if c.data_memory_size > 0 {
            let len = bucket.len().min(c.data_memory_size as usize);
            self.shm.check(c.data_shm_id, c.data_shm_offset, c.data_memory_size as usize)?;
            self.shm.write(c.data_shm_id, c.data_shm_offset, &bucket[..len])?;
        }
        self.shm.write_u32(c.result_shm_id, c.result_shm_offset, size)?;
        Ok(())
    }

    pub(crate) fn handle_get_bucket_data(&mut self, c: GetBucketData) -> Result<(), CommandError> {
        let bucket = self
            .buckets
            .get(c.bucket_id)
            .ok_or_else(|| CommandError::invalid(format!("bucket {} does not exist", c.bucket_id)))?;
        let start = c.offset as usize;
        let src = start
            .checked_add(c.size as usize)
            .and_then(|end| bucket.get(start..end))
            .ok_or_else(|| CommandError::invalid("bucket read out of range"))?;
        self.shm.write(c.shm_id, c.shm_offset, src)?;
        Ok(())
    }

    pub(crate) fn handle_delete_bucket(&mut self, c: DeleteBucket) -> Result<(), CommandError> {
        self.buckets.remove(c.bucket_id);
        Ok(())
    }

    /// Bucket contents as a string for name-taking commands.
    pub(crate) fn bucket_string(&self, bucket_id: u32) -> Result<String, CommandError> {
        self.buckets
            .get_string(bucket_id)
            .ok_or_else(|| CommandError::invalid(format!("bucket {bucket_id} missing or not UTF-8")))
    }

    /// Checks that `{u32 count; T[n]}` at `(id, offset)` is writable and
    /// unused, before any GL validation runs.
    pub(crate) fn check_sized_result(
        &self,
        id: u32,
        offset: u32,
        value_bytes: usize,
    ) -> Result<(), CommandError> {
        self.shm.check(id, offset, 4 + value_bytes)?;
        if self.shm.read_u32(id, offset)? != 0 {
            return Err(CommandError::invalid("result header was not zeroed"));
        }
        Ok(())
    }

    pub(crate) fn write_sized_result<T: bytemuck::Pod>(
        &self,
        id: u32,
        offset: u32,
        values: &[T],
    ) -> Result<(), CommandError> {
        self.shm
            .write_sized_result(id, offset, values)?
            .ok_or_else(|| CommandError::invalid("result header was not zeroed"))
    }
}

#[cfg(test)]
mod tests {
    use glcmd_protocol::CmdWriter;

    use crate::error::ErrorCode;
    use crate::testing::Harness;

    #[test]
    fn set_token_updates_last_token() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.set_token(41);
        w.set_token(42);
        assert_eq!(h.run(&w).result, ErrorCode::NoError);
        assert_eq!(h.decoder.last_token(), 42);
    }

    #[test]
    fn bucket_round_trip_through_shared_memory() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.set_bucket_data_immediate(3, b"hello");
        h.run_ok(&w);
        assert_eq!(h.decoder.bucket(3), Some(&b"hello"[..]));

        let mut w = CmdWriter::new();
        w.push(glcmd_protocol::cmd::GetBucketStart {
            bucket_id: 3,
            result_shm_id: h.shm_id,
            result_shm_offset: 0,
            data_memory_size: 16,
            data_shm_id: h.shm_id,
            data_shm_offset: 16,
        });
        h.run_ok(&w);
        assert_eq!(h.read_u32(0), 5);
        assert_eq!(&h.read_bytes(16, 5), b"hello");
    }

    #[test]
    fn oversized_bucket_is_a_protocol_error() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.push(glcmd_protocol::cmd::SetBucketSize {
            bucket_id: 1,
            size: u32::MAX,
        });
        let outcome = h.run(&w);
        assert_eq!(outcome.result, ErrorCode::InvalidArguments);
        assert_eq!(outcome.commands_processed, 1);
        assert_eq!(h.decoder.bucket(1), None);
    }
}
