use glcmd_protocol::cmd::{
    self, command_name, entries_from_le_bytes, entries_to_le_bytes, immediate_bytes, BindTexture,
    DrawArrays, GenTexturesImmediate, SetBucketDataImmediate, SetToken,
};
use glcmd_protocol::{gl, CmdDecodeError, CmdHeader, CmdWriter, Command};
use pretty_assertions::assert_eq;

/// Splits a canonical stream into `(header, args)` pairs.
fn walk(entries: &[u32]) -> Vec<(CmdHeader, &[u32])> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < entries.len() {
        let header = CmdHeader::from_entry(entries[pos]);
        let size = header.size as usize;
        assert!(size >= 1 && pos + size <= entries.len(), "malformed stream at {pos}");
        out.push((header, &entries[pos + 1..pos + size]));
        pos += size;
    }
    out
}

#[test]
fn writer_output_walks_command_by_command() {
    let mut w = CmdWriter::new();
    w.set_token(3);
    w.gen_textures(&[5, 6]);
    w.push(BindTexture {
        target: gl::TEXTURE_2D,
        texture: 5,
    });
    w.push(DrawArrays {
        mode: gl::TRIANGLES,
        first: 1,
        count: 6,
    });

    let names: Vec<_> = walk(w.as_entries())
        .iter()
        .map(|(h, _)| command_name(h.command).unwrap_or("?"))
        .collect();
    assert_eq!(names, ["SetToken", "GenTexturesImmediate", "BindTexture", "DrawArrays"]);

    let commands = walk(w.as_entries());
    assert_eq!(SetToken::decode(commands[0].1), Ok(SetToken { token: 3 }));
    let (gen_header, gen_args) = commands[1];
    assert_eq!(gen_header.size, 4);
    assert_eq!(GenTexturesImmediate::decode(gen_args), Ok(GenTexturesImmediate { n: 2 }));
    assert_eq!(&gen_args[1..], &[5u32, 6]);
    assert_eq!(
        DrawArrays::decode(commands[3].1),
        Ok(DrawArrays {
            mode: gl::TRIANGLES,
            first: 1,
            count: 6,
        })
    );
}

#[test]
fn immediate_bytes_survive_padding() {
    let mut w = CmdWriter::new();
    w.set_bucket_data_immediate(1, b"hello");
    let commands = walk(w.as_entries());
    let (header, args) = commands[1];
    assert_eq!(header.command, SetBucketDataImmediate::ID);
    let fixed = SetBucketDataImmediate::ARG_COUNT as usize;
    assert_eq!(immediate_bytes(&args[fixed..], 5), Some(b"hello".to_vec()));
    assert_eq!(immediate_bytes(&args[fixed..], 9), None);
}

#[test]
fn byte_stream_must_be_entry_aligned() {
    let mut w = CmdWriter::new();
    w.set_token(9);
    let bytes = entries_to_le_bytes(w.as_entries());
    assert_eq!(entries_from_le_bytes(&bytes).as_deref(), Ok(w.as_entries()));
    assert_eq!(
        entries_from_le_bytes(&bytes[..7]),
        Err(CmdDecodeError::SizeNotEntryAligned { len: 7 })
    );
}

#[test]
fn short_arguments_are_rejected() {
    assert_eq!(
        DrawArrays::decode(&[gl::TRIANGLES, 0]),
        Err(CmdDecodeError::TooFewArgs {
            expected: 3,
            found: 2,
        })
    );
    assert!(cmd::ALL_COMMANDS.iter().all(|(id, _)| *id <= cmd::MAX_COMMAND_ID));
}
