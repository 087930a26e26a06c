//! Client-visible behaviour driven entirely through the wire format.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use common::{Client, SHM_ID};
use glcmd::protocol::cmd::{
    AsyncTexImage2D, AsyncUploadSync, BeginQuery, BindBuffer, BindFramebuffer, BindRenderbuffer,
    BindTexture, BufferData, ClearColor, ColorMask, DrawArrays, Enable, EnableVertexAttribArray,
    EndQuery, Finish, FramebufferRenderbuffer, FramebufferTexture2D, LoseContext, QuerySync,
    ReadPixels, ReadPixelsResult, RenderbufferStorage, Scissor, TexImage2D, UseProgram,
    VertexAttribPointer, WaitAsyncTexImage2D,
};
use glcmd::protocol::{gl, CmdHeader, CmdWriter, Command};
use glcmd::service::{DecoderConfig, ErrorCode, LossReason, ResourceGroup};
use pretty_assertions::assert_eq;

const VERTEX: &str =
    "attribute vec4 a_position; attribute vec2 a_texcoord; void main() { gl_Position = a_position; }";
const FRAGMENT: &str = "void main() { }";

const PIXELS: u32 = 0;
const RESULT: u32 = 0x1000;
const SYNC: u32 = 0x1100;

fn color_framebuffer(w: &mut CmdWriter, width: i32, height: i32) {
    w.gen_framebuffers(&[1]);
    w.gen_renderbuffers(&[2]);
    w.push(BindFramebuffer {
        target: gl::FRAMEBUFFER,
        framebuffer: 1,
    });
    w.push(BindRenderbuffer {
        target: gl::RENDERBUFFER,
        renderbuffer: 2,
    });
    w.push(RenderbufferStorage {
        target: gl::RENDERBUFFER,
        internal_format: gl::RGBA8,
        width,
        height,
    });
    w.push(FramebufferRenderbuffer {
        target: gl::FRAMEBUFFER,
        attachment: gl::COLOR_ATTACHMENT0,
        renderbuffer_target: gl::RENDERBUFFER,
        renderbuffer: 2,
    });
}

fn read_pixels(width: i32, height: i32) -> ReadPixels {
    ReadPixels {
        x: 0,
        y: 0,
        width,
        height,
        format: gl::RGBA,
        pixel_type: gl::UNSIGNED_BYTE,
        pixels_shm_id: SHM_ID,
        pixels_shm_offset: PIXELS,
        result_shm_id: SHM_ID,
        result_shm_offset: RESULT,
        is_async: false,
    }
}

fn read_result(client: &Client) -> ReadPixelsResult {
    let mut buf = [0u8; ReadPixelsResult::SIZE_BYTES];
    buf.copy_from_slice(&client.read(RESULT, ReadPixelsResult::SIZE_BYTES));
    ReadPixelsResult::from_le_bytes(&buf)
}

#[test]
fn fresh_renderbuffer_reads_back_the_lazy_clear_color() -> Result<()> {
    let config = DecoderConfig {
        lazy_clear_color: [1.0, 0.0, 0.0, 1.0],
        ..DecoderConfig::default()
    };
    let mut client = Client::new(config)?;
    let mut w = CmdWriter::new();
    color_framebuffer(&mut w, 2, 2);
    w.push(read_pixels(2, 2));
    client.submit(&w)?;

    assert_eq!(client.get_error()?, gl::NO_ERROR);
    assert_eq!(read_result(&client).success, 1);
    assert_eq!(client.read(PIXELS, 16), [255u8, 0, 0, 255].repeat(4));

    // The attachment is now cleared; a second read does not clear again.
    client.write(RESULT, &[0; ReadPixelsResult::SIZE_BYTES]);
    let mut w = CmdWriter::new();
    w.push(read_pixels(2, 2));
    client.submit(&w)?;
    assert_eq!(client.decoder.stats().snapshot().lazy_clears, 1);
    assert_eq!(client.driver.call_count("clear"), 1);
    Ok(())
}

#[test]
fn fresh_texture_attachment_is_cleared_before_the_first_draw() -> Result<()> {
    let config = DecoderConfig {
        lazy_clear_color: [0.0, 1.0, 0.0, 1.0],
        ..DecoderConfig::default()
    };
    let mut client = Client::new(config)?;
    client.link_program(1, VERTEX, FRAGMENT)?;

    let mut w = CmdWriter::new();
    w.push(UseProgram { program: 1 });
    w.gen_textures(&[3]);
    w.push(BindTexture {
        target: gl::TEXTURE_2D,
        texture: 3,
    });
    w.push(TexImage2D {
        target: gl::TEXTURE_2D,
        level: 0,
        internal_format: gl::RGBA,
        width: 2,
        height: 2,
        format: gl::RGBA,
        pixel_type: gl::UNSIGNED_BYTE,
        pixels_shm_id: 0,
        pixels_shm_offset: 0,
    });
    w.gen_framebuffers(&[1]);
    w.push(BindFramebuffer {
        target: gl::FRAMEBUFFER,
        framebuffer: 1,
    });
    w.push(FramebufferTexture2D {
        target: gl::FRAMEBUFFER,
        attachment: gl::COLOR_ATTACHMENT0,
        textarget: gl::TEXTURE_2D,
        texture: 3,
        level: 0,
    });
    w.push(ClearColor {
        red: 0.25,
        green: 0.5,
        blue: 0.75,
        alpha: 1.0,
    });
    w.push(ColorMask {
        red: true,
        green: false,
        blue: true,
        alpha: true,
    });
    w.push(Enable {
        cap: gl::SCISSOR_TEST,
    });
    w.push(Scissor {
        x: 1,
        y: 1,
        width: 1,
        height: 1,
    });
    let draw = DrawArrays {
        mode: gl::TRIANGLES,
        first: 0,
        count: 3,
    };
    w.push(draw);
    client.submit(&w)?;

    assert_eq!(client.get_error()?, gl::NO_ERROR);
    assert_eq!(client.driver.call_count("clear"), 1);
    assert_eq!(client.driver.draw_calls().len(), 1);
    let level = client.decoder.texture_level(3, gl::TEXTURE_2D, 0).expect("level 0 is defined");
    assert!(level.cleared);
    // The whole level is cleared even though the client scissor covers one pixel.
    let service = client.decoder.texture_service_id(3).expect("texture 3 exists");
    assert_eq!(
        client.driver.texture_level(service, gl::TEXTURE_2D, 0),
        Some([0u8, 255, 0, 255].repeat(4))
    );

    // The client's clear state is back in place for the draw.
    assert_eq!(client.driver.clear_color_value(), [0.25, 0.5, 0.75, 1.0]);
    assert_eq!(client.driver.color_mask_value(), [true, false, true, true]);
    assert!(client.driver.is_enabled(gl::SCISSOR_TEST));
    assert_eq!(client.driver.scissor_value(), [1, 1, 1, 1]);

    let mut w = CmdWriter::new();
    w.push(draw);
    client.submit(&w)?;
    assert_eq!(client.driver.call_count("clear"), 1);
    assert_eq!(client.decoder.stats().snapshot().lazy_clears, 1);
    Ok(())
}

#[test]
fn reading_an_incomplete_framebuffer_fails() -> Result<()> {
    let mut client = Client::new(DecoderConfig::default())?;
    let mut w = CmdWriter::new();
    w.gen_framebuffers(&[1]);
    w.push(BindFramebuffer {
        target: gl::FRAMEBUFFER,
        framebuffer: 1,
    });
    w.push(read_pixels(2, 2));
    client.submit(&w)?;
    assert_eq!(client.get_error()?, gl::INVALID_FRAMEBUFFER_OPERATION);
    assert_eq!(client.driver.call_count("read_pixels"), 0);
    Ok(())
}

#[test]
fn second_begin_query_on_an_active_target_is_rejected() -> Result<()> {
    let mut client = Client::new(DecoderConfig::default())?;
    let begin = |id, offset| BeginQuery {
        target: gl::ANY_SAMPLES_PASSED,
        id,
        sync_shm_id: SHM_ID,
        sync_shm_offset: offset,
    };
    let mut w = CmdWriter::new();
    w.gen_queries(&[1, 2]);
    w.push(begin(1, SYNC));
    w.push(begin(2, SYNC + 16));
    client.submit(&w)?;

    assert_eq!(client.get_error()?, gl::INVALID_OPERATION);
    assert_eq!(client.decoder.active_query(gl::ANY_SAMPLES_PASSED), Some(1));

    let mut w = CmdWriter::new();
    w.push(EndQuery {
        target: gl::ANY_SAMPLES_PASSED,
        submit_count: 4,
    });
    w.push(Finish {});
    client.submit(&w)?;

    let mut buf = [0u8; QuerySync::SIZE_BYTES];
    buf.copy_from_slice(&client.read(SYNC, QuerySync::SIZE_BYTES));
    assert_eq!(QuerySync::from_le_bytes(&buf).process_count, 4);
    // The rejected begin never reached its sync block.
    assert_eq!(client.read(SYNC + 16, QuerySync::SIZE_BYTES), vec![0u8; QuerySync::SIZE_BYTES]);
    Ok(())
}

fn async_upload(token: u32) -> AsyncTexImage2D {
    AsyncTexImage2D {
        target: gl::TEXTURE_2D,
        level: 0,
        internal_format: gl::RGBA,
        width: 2,
        height: 2,
        format: gl::RGBA,
        pixel_type: gl::UNSIGNED_BYTE,
        pixels_shm_id: SHM_ID,
        pixels_shm_offset: PIXELS,
        async_upload_token: token,
        sync_shm_id: SHM_ID,
        sync_shm_offset: SYNC,
    }
}

#[test]
fn second_async_upload_is_rejected_and_first_completes() -> Result<()> {
    let config = DecoderConfig {
        async_uploads_per_batch: 0,
        ..DecoderConfig::default()
    };
    let mut client = Client::new(config)?;
    client.write(PIXELS, &[0x5A; 16]);
    let mut w = CmdWriter::new();
    w.gen_textures(&[3]);
    w.push(BindTexture {
        target: gl::TEXTURE_2D,
        texture: 3,
    });
    w.push(async_upload(1));
    w.push(async_upload(2));
    client.submit(&w)?;

    assert_eq!(client.get_error()?, gl::INVALID_OPERATION);
    assert_eq!(client.decoder.pending_async_uploads(), 1);

    // The pixels were copied at request time.
    client.write(PIXELS, &[0; 16]);
    let mut w = CmdWriter::new();
    w.push(WaitAsyncTexImage2D {
        target: gl::TEXTURE_2D,
    });
    client.submit(&w)?;

    let mut buf = [0u8; AsyncUploadSync::SIZE_BYTES];
    buf.copy_from_slice(&client.read(SYNC, AsyncUploadSync::SIZE_BYTES));
    assert_eq!(AsyncUploadSync::from_le_bytes(&buf).async_upload_token, 1);
    let service = client.decoder.texture_service_id(3).expect("texture 3 exists");
    assert_eq!(
        client.driver.texture_level(service, gl::TEXTURE_2D, 0),
        Some(vec![0x5Au8; 16])
    );
    Ok(())
}

#[test]
fn short_attribute_buffer_rejects_the_draw_before_the_driver() -> Result<()> {
    let mut client = Client::new(DecoderConfig::default())?;
    client.link_program(1, VERTEX, FRAGMENT)?;
    let mut w = CmdWriter::new();
    w.push(UseProgram { program: 1 });
    w.gen_buffers(&[10]);
    w.push(BindBuffer {
        target: gl::ARRAY_BUFFER,
        buffer: 10,
    });
    // Two vertices of vec2 floats.
    w.push(BufferData {
        target: gl::ARRAY_BUFFER,
        size: 16,
        data_shm_id: SHM_ID,
        data_shm_offset: PIXELS,
        usage: gl::STATIC_DRAW,
    });
    w.push(VertexAttribPointer {
        index: 1,
        size: 2,
        attrib_type: gl::FLOAT,
        normalized: false,
        stride: 0,
        offset: 0,
    });
    w.push(EnableVertexAttribArray { index: 1 });
    w.push(DrawArrays {
        mode: gl::TRIANGLES,
        first: 0,
        count: 3,
    });
    client.submit(&w)?;

    assert_eq!(client.get_error()?, gl::INVALID_OPERATION);
    assert_eq!(client.driver.call_count("draw_arrays"), 0);
    assert!(client.driver.draw_calls().is_empty());
    Ok(())
}

#[test]
fn command_larger_than_the_buffer_is_not_consumed() -> Result<()> {
    let mut client = Client::new(DecoderConfig::default())?;
    let mut w = CmdWriter::new();
    w.push_raw(
        CmdHeader {
            size: 8,
            command: DrawArrays::ID,
        },
        &[gl::TRIANGLES, 0, 3],
    );
    let outcome = client.run(&w);
    assert_eq!(outcome.result, ErrorCode::OutOfBounds);
    assert_eq!(outcome.entries_processed, 0);
    assert_eq!(outcome.commands_processed, 0);
    Ok(())
}

#[test]
fn context_loss_spreads_through_the_share_group() -> Result<()> {
    let group = ResourceGroup::shared(true);
    let mut first = Client::in_group(DecoderConfig::default(), group.clone())?;
    let mut second = Client::in_group(DecoderConfig::default(), group)?;
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    second
        .decoder
        .set_loss_observer(Box::new(move |reason: LossReason| sink.borrow_mut().push(reason)));

    let mut w = CmdWriter::new();
    w.push(LoseContext {
        current: gl::GUILTY_CONTEXT_RESET,
        other: gl::INNOCENT_CONTEXT_RESET,
    });
    assert_eq!(first.run(&w).result, ErrorCode::LostContext);

    second.driver.reset_call_counts();
    let mut w = CmdWriter::new();
    w.push(Finish {});
    let outcome = second.run(&w);
    assert_eq!(outcome.result, ErrorCode::LostContext);
    assert_eq!(outcome.entries_processed, 0);
    assert_eq!(second.driver.call_count("finish"), 0);
    assert_eq!(*seen.borrow(), vec![LossReason::Innocent]);
    Ok(())
}

#[test]
fn stats_serialize_to_json() -> Result<()> {
    let mut client = Client::new(DecoderConfig::default())?;
    let mut w = CmdWriter::new();
    w.set_token(1);
    w.set_token(2);
    client.submit(&w)?;
    let json: serde_json::Value = serde_json::from_str(&client.decoder.stats().to_json())?;
    assert_eq!(json["commands"], 2);
    assert_eq!(json["batches"], 1);
    Ok(())
}
