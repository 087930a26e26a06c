//! Objects shared between decoders of one resource group.

mod common;

use common::{decoder, run_ok, SHM_ID};
use glcmd_protocol::cmd::{
    BindBuffer, BindFramebuffer, BindRenderbuffer, BindTexture, BufferData,
    CheckFramebufferStatus, FramebufferRenderbuffer, RenderbufferStorage, VertexAttribPointer,
};
use glcmd_protocol::{gl, CmdWriter, Command};
use glcmd_service::resources::Completeness;
use glcmd_service::{ErrorCode, GlError, ResourceGroup, SoftwareDriver};
use pretty_assertions::assert_eq;

#[test]
fn generated_ids_are_visible_to_every_member() -> anyhow::Result<()> {
    let group = ResourceGroup::shared(false);
    let driver = SoftwareDriver::new(8, 8);
    let mut first = decoder(&group, &driver)?;
    let mut second = decoder(&group, &driver)?;

    let mut w = CmdWriter::new();
    w.gen_buffers(&[10]);
    run_ok(&mut first, &w);
    assert!(second.buffer_service_id(10).is_some());
    assert_eq!(first.buffer_service_id(10), second.buffer_service_id(10));

    // Generating an id the group already holds is a protocol error.
    let outcome = second.process_commands(w.as_entries());
    assert_eq!(outcome.result, ErrorCode::InvalidArguments);
    assert_eq!(driver.live_objects().buffers, 1);

    let mut w = CmdWriter::new();
    w.delete_buffers(&[10]);
    run_ok(&mut second, &w);
    assert_eq!(first.buffer_service_id(10), None);
    assert_eq!(driver.live_objects().buffers, 0);
    Ok(())
}

fn single<C: Command>(cmd: C) -> CmdWriter {
    let mut w = CmdWriter::new();
    w.push(cmd);
    w
}

#[test]
fn binding_ungenerated_ids_creates_nothing_without_bind_generation() -> anyhow::Result<()> {
    let group = ResourceGroup::shared(false);
    let driver = SoftwareDriver::new(8, 8);
    let binds = [
        single(BindBuffer {
            target: gl::ARRAY_BUFFER,
            buffer: 10,
        }),
        single(BindTexture {
            target: gl::TEXTURE_2D,
            texture: 11,
        }),
        single(BindFramebuffer {
            target: gl::FRAMEBUFFER,
            framebuffer: 12,
        }),
        single(BindRenderbuffer {
            target: gl::RENDERBUFFER,
            renderbuffer: 13,
        }),
    ];
    for w in &binds {
        let mut member = decoder(&group, &driver)?;
        run_ok(&mut member, w);
        assert_eq!(member.pending_gl_error(), Some(GlError::InvalidOperation));
        assert_eq!(member.buffer_service_id(10), None);
        assert_eq!(member.texture_service_id(11), None);
        assert_eq!(member.framebuffer_completeness(12), None);
    }

    let live = driver.live_objects();
    assert_eq!(
        (live.buffers, live.textures, live.framebuffers, live.renderbuffers),
        (0, 0, 0, 0)
    );
    Ok(())
}

#[test]
fn deleted_buffer_lives_while_another_member_points_at_it() -> anyhow::Result<()> {
    let group = ResourceGroup::shared(true);
    let driver = SoftwareDriver::new(8, 8);
    let mut owner = decoder(&group, &driver)?;
    let mut user = decoder(&group, &driver)?;

    let mut w = CmdWriter::new();
    w.gen_buffers(&[10]);
    run_ok(&mut owner, &w);

    let mut w = CmdWriter::new();
    w.push(BindBuffer {
        target: gl::ARRAY_BUFFER,
        buffer: 10,
    });
    w.push(BufferData {
        target: gl::ARRAY_BUFFER,
        size: 32,
        data_shm_id: 0,
        data_shm_offset: 0,
        usage: gl::STATIC_DRAW,
    });
    w.push(VertexAttribPointer {
        index: 1,
        size: 4,
        attrib_type: gl::FLOAT,
        normalized: false,
        stride: 0,
        offset: 0,
    });
    run_ok(&mut user, &w);

    let mut w = CmdWriter::new();
    w.delete_buffers(&[10]);
    run_ok(&mut owner, &w);
    assert_eq!(user.buffer_service_id(10), None);
    assert_eq!(driver.live_objects().buffers, 1);

    user.destroy(true);
    assert_eq!(driver.live_objects().buffers, 0);
    Ok(())
}

#[test]
fn storage_change_in_one_member_invalidates_another_members_verdict() -> anyhow::Result<()> {
    let group = ResourceGroup::shared(true);
    let driver = SoftwareDriver::new(8, 8);
    let mut first = decoder(&group, &driver)?;
    let mut second = decoder(&group, &driver)?;

    let storage = |width| RenderbufferStorage {
        target: gl::RENDERBUFFER,
        internal_format: gl::RGBA8,
        width,
        height: 4,
    };
    let mut w = CmdWriter::new();
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
    w.push(storage(4));
    w.push(FramebufferRenderbuffer {
        target: gl::FRAMEBUFFER,
        attachment: gl::COLOR_ATTACHMENT0,
        renderbuffer_target: gl::RENDERBUFFER,
        renderbuffer: 2,
    });
    w.push(CheckFramebufferStatus {
        target: gl::FRAMEBUFFER,
        result_shm_id: SHM_ID,
        result_shm_offset: 0,
    });
    run_ok(&mut first, &w);
    assert_eq!(first.framebuffer_completeness(1), Some(Completeness::Complete));

    let mut w = CmdWriter::new();
    w.push(BindRenderbuffer {
        target: gl::RENDERBUFFER,
        renderbuffer: 2,
    });
    w.push(storage(8));
    run_ok(&mut second, &w);
    assert_eq!(first.framebuffer_completeness(1), Some(Completeness::Unknown));
    Ok(())
}
