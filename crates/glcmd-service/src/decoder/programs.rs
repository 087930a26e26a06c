//! Shaders, programs and uniforms.
//!
//! Shaders and programs share one client id namespace: passing a shader id
//! where a program is expected is `INVALID_OPERATION`, an id naming neither
//! is `INVALID_VALUE`.

use glcmd_protocol::cmd::{
    AttachShader, BindAttribLocationBucket, CompileShader, CreateProgram, CreateShader,
    DeleteProgram, DeleteShader, DetachShader, GetAttribLocation, GetProgramInfoLog, GetProgramiv,
    GetShaderInfoLog, GetShaderiv, GetUniformLocation, LinkProgram, ShaderSourceBucket, Uniform1i,
    Uniform4f, UseProgram,
};
use glcmd_protocol::gl;

use super::Decoder;
use crate::error::{CommandError, GlError};
use crate::resources::{is_sampler, Program, ProgramKey, Shader, ShaderKey};

/// Attribute and uniform names reserved for the implementation.
fn is_reserved_name(name: &str) -> bool {
    name.starts_with("gl_")
}

/// `INFO_LOG_LENGTH` and friends count the terminating NUL of a non-empty
/// string.
fn gl_string_length(s: &str) -> i32 {
    if s.is_empty() {
        0
    } else {
        s.len() as i32 + 1
    }
}

impl Decoder {
    fn id_in_use(&self, client_id: u32) -> bool {
        let group = self.group.borrow();
        group.programs.contains_client(client_id) || group.shaders.contains_client(client_id)
    }

    pub(crate) fn program_key(&mut self, func: &'static str, client_id: u32) -> Option<ProgramKey> {
        let (program, is_shader) = {
            let group = self.group.borrow();
            (group.programs.get(client_id), group.shaders.contains_client(client_id))
        };
        match program {
            Some(key) => Some(key),
            None if is_shader => self.reject(GlError::InvalidOperation, func, "shader passed as program"),
            None => self.reject(GlError::InvalidValue, func, "unknown program"),
        }
    }

    fn shader_key(&mut self, func: &'static str, client_id: u32) -> Option<ShaderKey> {
        let (shader, is_program) = {
            let group = self.group.borrow();
            (group.shaders.get(client_id), group.programs.contains_client(client_id))
        };
        match shader {
            Some(key) => Some(key),
            None if is_program => self.reject(GlError::InvalidOperation, func, "program passed as shader"),
            None => self.reject(GlError::InvalidValue, func, "unknown shader"),
        }
    }

    fn program_service(&self, key: ProgramKey) -> u32 {
        self.group.borrow().programs.service_id(key).unwrap_or(0)
    }

    fn shader_service(&self, key: ShaderKey) -> u32 {
        self.group.borrow().shaders.service_id(key).unwrap_or(0)
    }

    pub(crate) fn handle_create_program(&mut self, c: CreateProgram) -> Result<(), CommandError> {
        if c.client_id == 0 || self.id_in_use(c.client_id) {
            return Err(CommandError::invalid(format!("program id {} cannot be created", c.client_id)));
        }
        let service = self.driver.create_program();
        self.group
            .borrow_mut()
            .programs
            .create(c.client_id, service, Program::default())
            .map_err(|e| CommandError::invalid(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn handle_create_shader(&mut self, c: CreateShader) -> Result<(), CommandError> {
        if !matches!(c.shader_type, gl::VERTEX_SHADER | gl::FRAGMENT_SHADER) {
            return self.gl_error(GlError::InvalidEnum, "glCreateShader", "invalid shader type");
        }
        if c.client_id == 0 || self.id_in_use(c.client_id) {
            return Err(CommandError::invalid(format!("shader id {} cannot be created", c.client_id)));
        }
        let service = self.driver.create_shader(c.shader_type);
        self.group
            .borrow_mut()
            .shaders
            .create(c.client_id, service, Shader::new(c.shader_type))
            .map_err(|e| CommandError::invalid(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn handle_delete_program(&mut self, c: DeleteProgram) -> Result<(), CommandError> {
        if c.program == 0 {
            return Ok(());
        }
        let Some(key) = self.program_key("glDeleteProgram", c.program) else {
            return Ok(());
        };
        // A program in use lingers until the last decoder stops using it.
        let mut group = self.group.borrow_mut();
        if let Some(dead) = group.programs.remove(key) {
            group.retire_program(dead, Some(self.driver.as_mut()));
        }
        Ok(())
    }

    pub(crate) fn handle_delete_shader(&mut self, c: DeleteShader) -> Result<(), CommandError> {
        if c.shader == 0 {
            return Ok(());
        }
        let Some(key) = self.shader_key("glDeleteShader", c.shader) else {
            return Ok(());
        };
        let dead = self.group.borrow_mut().shaders.remove(key);
        if let Some(dead) = dead {
            self.driver.delete_shader(dead.service_id);
        }
        Ok(())
    }

    pub(crate) fn handle_attach_shader(&mut self, c: AttachShader) -> Result<(), CommandError> {
        const FUNC: &str = "glAttachShader";
        let Some(program) = self.program_key(FUNC, c.program) else {
            return Ok(());
        };
        let Some(shader) = self.shader_key(FUNC, c.shader) else {
            return Ok(());
        };
        let attached = {
            let mut group = self.group.borrow_mut();
            let shader_type = group.shaders.object(shader).map_or(0, |s| s.shader_type);
            let slot = group
                .programs
                .object_mut(program)
                .and_then(|p| p.shader_slot(shader_type));
            match slot {
                Some(slot @ None) => {
                    *slot = Some(shader);
                    group.shaders.add_ref(shader);
                    true
                }
                _ => false,
            }
        };
        if !attached {
            return self.gl_error(
                GlError::InvalidOperation,
                FUNC,
                "a shader of that type is already attached",
            );
        }
        let (p, s) = (self.program_service(program), self.shader_service(shader));
        self.driver.attach_shader(p, s);
        Ok(())
    }

    pub(crate) fn handle_detach_shader(&mut self, c: DetachShader) -> Result<(), CommandError> {
        const FUNC: &str = "glDetachShader";
        let Some(program) = self.program_key(FUNC, c.program) else {
            return Ok(());
        };
        let Some(shader) = self.shader_key(FUNC, c.shader) else {
            return Ok(());
        };
        let detached = {
            let mut group = self.group.borrow_mut();
            let shader_type = group.shaders.object(shader).map_or(0, |s| s.shader_type);
            let slot = group
                .programs
                .object_mut(program)
                .and_then(|p| p.shader_slot(shader_type));
            match slot {
                Some(slot) if *slot == Some(shader) => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if !detached {
            return self.gl_error(GlError::InvalidOperation, FUNC, "shader is not attached");
        }
        let (p, s) = (self.program_service(program), self.shader_service(shader));
        self.driver.detach_shader(p, s);
        self.group
            .borrow_mut()
            .release_shader(shader, Some(self.driver.as_mut()));
        Ok(())
    }

    pub(crate) fn handle_shader_source_bucket(
        &mut self,
        c: ShaderSourceBucket,
    ) -> Result<(), CommandError> {
        let source = self.bucket_string(c.str_bucket_id)?;
        let Some(shader) = self.shader_key("glShaderSource", c.shader) else {
            return Ok(());
        };
        if let Some(s) = self.group.borrow_mut().shaders.object_mut(shader) {
            s.source = Some(source);
        }
        Ok(())
    }

    pub(crate) fn handle_compile_shader(&mut self, c: CompileShader) -> Result<(), CommandError> {
        let Some(shader) = self.shader_key("glCompileShader", c.shader) else {
            return Ok(());
        };
        let source = self
            .group
            .borrow()
            .shaders
            .object(shader)
            .and_then(|s| s.source.clone())
            .unwrap_or_default();
        let service = self.shader_service(shader);
        let output = self.driver.compile_shader(service, &source);
        if !output.success {
            tracing::debug!(shader = c.shader, log = %output.info_log, "shader failed to compile");
        }
        if let Some(s) = self.group.borrow_mut().shaders.object_mut(shader) {
            s.record_compile(output);
        }
        Ok(())
    }

    pub(crate) fn handle_bind_attrib_location_bucket(
        &mut self,
        c: BindAttribLocationBucket,
    ) -> Result<(), CommandError> {
        const FUNC: &str = "glBindAttribLocation";
        let name = self.bucket_string(c.name_bucket_id)?;
        if c.index >= self.limits.max_vertex_attribs {
            return self.gl_error(GlError::InvalidValue, FUNC, "index out of range");
        }
        if is_reserved_name(&name) {
            return self.gl_error(GlError::InvalidOperation, FUNC, "reserved attribute name");
        }
        let Some(program) = self.program_key(FUNC, c.program) else {
            return Ok(());
        };
        if let Some(p) = self.group.borrow_mut().programs.object_mut(program) {
            p.attrib_bindings.insert(name.clone(), c.index);
        }
        let service = self.program_service(program);
        self.driver.bind_attrib_location(service, c.index, &name);
        Ok(())
    }

    pub(crate) fn handle_link_program(&mut self, c: LinkProgram) -> Result<(), CommandError> {
        let Some(program) = self.program_key("glLinkProgram", c.program) else {
            return Ok(());
        };
        let service = self.program_service(program);
        let output = self.driver.link_program(service);
        if !output.success {
            tracing::debug!(program = c.program, log = %output.info_log, "program failed to link");
        }
        if let Some(p) = self.group.borrow_mut().programs.object_mut(program) {
            p.record_link(output);
        }
        // The emulated attribute 0 depends on what the program reads.
        self.attrib0.invalidate();
        Ok(())
    }

    pub(crate) fn handle_use_program(&mut self, c: UseProgram) -> Result<(), CommandError> {
        const FUNC: &str = "glUseProgram";
        let key = if c.program == 0 {
            None
        } else {
            let Some(key) = self.program_key(FUNC, c.program) else {
                return Ok(());
            };
            let linked = self
                .group
                .borrow()
                .programs
                .object(key)
                .is_some_and(|p| p.linked);
            if !linked {
                return self.gl_error(GlError::InvalidOperation, FUNC, "program is not linked");
            }
            Some(key)
        };
        let old = std::mem::replace(&mut self.state.current_program, key);
        if old != key {
            let mut group = self.group.borrow_mut();
            if let Some(new) = key {
                group.programs.add_ref(new);
            }
            if let Some(old) = old {
                group.release_program(old, Some(self.driver.as_mut()));
            }
        }
        let service = key.map_or(0, |k| self.program_service(k));
        self.driver.use_program(service);
        Ok(())
    }

    /// Reads a location name and checks the `i32` result slot, which must
    /// hold -1.
    fn location_query(
        &self,
        name_bucket_id: u32,
        result_shm_id: u32,
        result_shm_offset: u32,
    ) -> Result<String, CommandError> {
        let name = self.bucket_string(name_bucket_id)?;
        self.shm.check(result_shm_id, result_shm_offset, 4)?;
        if self.shm.read_u32(result_shm_id, result_shm_offset)? as i32 != -1 {
            return Err(CommandError::invalid("location result was not initialised to -1"));
        }
        Ok(name)
    }

    fn linked_program_key(&mut self, func: &'static str, client_id: u32) -> Option<ProgramKey> {
        let key = self.program_key(func, client_id)?;
        let linked = self
            .group
            .borrow()
            .programs
            .object(key)
            .is_some_and(|p| p.linked);
        if linked {
            Some(key)
        } else {
            self.reject(GlError::InvalidOperation, func, "program is not linked")
        }
    }

    pub(crate) fn handle_get_attrib_location(
        &mut self,
        c: GetAttribLocation,
    ) -> Result<(), CommandError> {
        let name = self.location_query(c.name_bucket_id, c.result_shm_id, c.result_shm_offset)?;
        let Some(program) = self.linked_program_key("glGetAttribLocation", c.program) else {
            return Ok(());
        };
        let location = if is_reserved_name(&name) {
            -1
        } else {
            self.group
                .borrow()
                .programs
                .object(program)
                .map_or(-1, |p| p.attrib_location(&name))
        };
        self.shm
            .write_u32(c.result_shm_id, c.result_shm_offset, location as u32)?;
        Ok(())
    }

    pub(crate) fn handle_get_uniform_location(
        &mut self,
        c: GetUniformLocation,
    ) -> Result<(), CommandError> {
        let name = self.location_query(c.name_bucket_id, c.result_shm_id, c.result_shm_offset)?;
        let Some(program) = self.linked_program_key("glGetUniformLocation", c.program) else {
            return Ok(());
        };
        let location = if is_reserved_name(&name) {
            -1
        } else {
            self.group
                .borrow()
                .programs
                .object(program)
                .map_or(-1, |p| p.uniform_location(&name))
        };
        self.shm
            .write_u32(c.result_shm_id, c.result_shm_offset, location as u32)?;
        Ok(())
    }

    pub(crate) fn handle_get_programiv(&mut self, c: GetProgramiv) -> Result<(), CommandError> {
        const FUNC: &str = "glGetProgramiv";
        self.check_sized_result(c.result_shm_id, c.result_shm_offset, 4)?;
        let Some(program) = self.program_key(FUNC, c.program) else {
            return Ok(());
        };
        let value = {
            let group = self.group.borrow();
            let Some(p) = group.programs.object(program) else {
                return Ok(());
            };
            match c.pname {
                gl::DELETE_STATUS => Some(0),
                gl::LINK_STATUS => Some(p.linked as i32),
                gl::INFO_LOG_LENGTH => Some(gl_string_length(&p.info_log)),
                gl::ATTACHED_SHADERS => Some(p.attached_count() as i32),
                gl::ACTIVE_ATTRIBUTES => Some(p.attribs.len() as i32),
                gl::ACTIVE_UNIFORMS => Some(p.uniforms.len() as i32),
                _ => None,
            }
        };
        match value {
            Some(value) => self.write_sized_result(c.result_shm_id, c.result_shm_offset, &[value]),
            None => self.gl_error(GlError::InvalidEnum, FUNC, "invalid pname"),
        }
    }

    pub(crate) fn handle_get_shaderiv(&mut self, c: GetShaderiv) -> Result<(), CommandError> {
        const FUNC: &str = "glGetShaderiv";
        self.check_sized_result(c.result_shm_id, c.result_shm_offset, 4)?;
        let Some(shader) = self.shader_key(FUNC, c.shader) else {
            return Ok(());
        };
        let value = {
            let group = self.group.borrow();
            let Some(s) = group.shaders.object(shader) else {
                return Ok(());
            };
            match c.pname {
                gl::SHADER_TYPE => Some(s.shader_type as i32),
                gl::DELETE_STATUS => Some(0),
                gl::COMPILE_STATUS => Some(s.compiled as i32),
                gl::INFO_LOG_LENGTH => Some(gl_string_length(&s.info_log)),
                gl::SHADER_SOURCE_LENGTH => {
                    Some(s.source.as_deref().map_or(0, gl_string_length))
                }
                _ => None,
            }
        };
        match value {
            Some(value) => self.write_sized_result(c.result_shm_id, c.result_shm_offset, &[value]),
            None => self.gl_error(GlError::InvalidEnum, FUNC, "invalid pname"),
        }
    }

    pub(crate) fn handle_get_shader_info_log(
        &mut self,
        c: GetShaderInfoLog,
    ) -> Result<(), CommandError> {
        self.buckets.set(c.bucket_id, Vec::new());
        let Some(shader) = self.shader_key("glGetShaderInfoLog", c.shader) else {
            return Ok(());
        };
        let log = self
            .group
            .borrow()
            .shaders
            .object(shader)
            .map(|s| s.info_log.clone().into_bytes())
            .unwrap_or_default();
        self.buckets.set(c.bucket_id, log);
        Ok(())
    }

    pub(crate) fn handle_get_program_info_log(
        &mut self,
        c: GetProgramInfoLog,
    ) -> Result<(), CommandError> {
        self.buckets.set(c.bucket_id, Vec::new());
        let Some(program) = self.program_key("glGetProgramInfoLog", c.program) else {
            return Ok(());
        };
        let log = self
            .group
            .borrow()
            .programs
            .object(program)
            .map(|p| p.info_log.clone().into_bytes())
            .unwrap_or_default();
        self.buckets.set(c.bucket_id, log);
        Ok(())
    }

    /// Type of the uniform at `location` in the current program. `None` for
    /// location -1 (silently ignored) and after recording an error.
    pub(crate) fn uniform_type(&mut self, func: &'static str, location: i32) -> Option<u32> {
        let Some(program) = self.state.current_program else {
            return self.reject(GlError::InvalidOperation, func, "no program in use");
        };
        if location == -1 {
            return None;
        }
        let ty = self
            .group
            .borrow()
            .programs
            .object(program)
            .and_then(|p| p.uniform(location))
            .map(|u| u.ty);
        match ty {
            Some(ty) => Some(ty),
            None => self.reject(GlError::InvalidOperation, func, "unknown uniform location"),
        }
    }

    pub(crate) fn handle_uniform_1i(&mut self, c: Uniform1i) -> Result<(), CommandError> {
        const FUNC: &str = "glUniform1i";
        let Some(ty) = self.uniform_type(FUNC, c.location) else {
            return Ok(());
        };
        if is_sampler(ty) {
            if c.x < 0 || c.x as u32 >= self.limits.max_texture_units {
                return self.gl_error(GlError::InvalidValue, FUNC, "texture unit out of range");
            }
            let mut group = self.group.borrow_mut();
            let uniform = self
                .state
                .current_program
                .and_then(|p| group.programs.object_mut(p))
                .and_then(|p| p.uniform_mut(c.location));
            if let Some(uniform) = uniform {
                uniform.sampler_unit = Some(c.x);
            }
        } else if ty != gl::INT {
            return self.gl_error(GlError::InvalidOperation, FUNC, "uniform type mismatch");
        }
        self.driver.uniform_1i(c.location, c.x);
        Ok(())
    }

    pub(crate) fn handle_uniform_4f(&mut self, c: Uniform4f) -> Result<(), CommandError> {
        const FUNC: &str = "glUniform4f";
        let Some(ty) = self.uniform_type(FUNC, c.location) else {
            return Ok(());
        };
        if ty != gl::FLOAT_VEC4 {
            return self.gl_error(GlError::InvalidOperation, FUNC, "uniform type mismatch");
        }
        self.driver.uniform_4f(c.location, [c.x, c.y, c.z, c.w]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glcmd_protocol::cmd::{
        AttachShader, CreateProgram, CreateShader, GetProgramiv, GetUniformLocation, Uniform1i,
        UseProgram,
    };
    use glcmd_protocol::{gl, CmdWriter};

    use crate::driver::software::UniformValue;
    use crate::error::ErrorCode;
    use crate::testing::{Harness, FRAGMENT_SOURCE, VERTEX_SOURCE};

    #[test]
    fn shaders_and_programs_share_a_namespace() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.push(CreateShader {
            shader_type: gl::VERTEX_SHADER,
            client_id: 1,
        });
        h.run_ok(&w);

        let mut w = CmdWriter::new();
        w.push(CreateProgram { client_id: 1 });
        assert_eq!(h.run(&w).result, ErrorCode::InvalidArguments);

        let mut w = CmdWriter::new();
        w.push(UseProgram { program: 1 });
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_OPERATION);

        let mut w = CmdWriter::new();
        w.push(UseProgram { program: 99 });
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_VALUE);
    }

    #[test]
    fn second_shader_of_a_type_cannot_be_attached() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.push(CreateProgram { client_id: 1 });
        for id in [2, 3] {
            w.push(CreateShader {
                shader_type: gl::VERTEX_SHADER,
                client_id: id,
            });
            w.push(AttachShader { program: 1, shader: id });
        }
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_OPERATION);
        assert_eq!(h.driver.call_count("attach_shader"), 1);
    }

    #[test]
    fn linked_program_reports_status_and_locations() {
        let mut h = Harness::new();
        h.build_program(1, VERTEX_SOURCE, FRAGMENT_SOURCE);

        let mut w = CmdWriter::new();
        w.push(GetProgramiv {
            program: 1,
            pname: gl::LINK_STATUS,
            result_shm_id: h.shm_id,
            result_shm_offset: 0,
        });
        h.run_ok(&w);
        assert_eq!(h.read_u32(0), 1);
        assert_eq!(h.read_u32(4), 1);

        h.write_bytes(16, &(-1i32).to_le_bytes());
        let mut w = CmdWriter::new();
        w.set_bucket_data_immediate(9, b"u_color");
        w.push(GetUniformLocation {
            program: 1,
            name_bucket_id: 9,
            result_shm_id: h.shm_id,
            result_shm_offset: 16,
        });
        h.run_ok(&w);
        assert_eq!(h.read_u32(16) as i32, 0);
    }

    #[test]
    fn sampler_uniform_checks_unit_range() {
        let mut h = Harness::new();
        h.build_program(1, VERTEX_SOURCE, FRAGMENT_SOURCE);
        let sampler = h.uniform_location(1, "u_texture");
        let mut w = CmdWriter::new();
        w.push(UseProgram { program: 1 });
        w.push(Uniform1i {
            location: sampler,
            x: 64,
        });
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_VALUE);

        let mut w = CmdWriter::new();
        w.push(Uniform1i {
            location: sampler,
            x: 1,
        });
        h.run_ok(&w);
        assert_eq!(h.decoder.pending_gl_error(), None);
        let service = h.decoder.program_service_id(1).unwrap();
        assert_eq!(h.driver.uniform(service, sampler), Some(UniformValue::Int(vec![1])));
    }
}
