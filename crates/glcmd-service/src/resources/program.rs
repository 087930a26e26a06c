use glcmd_protocol::gl;
use hashbrown::HashMap;

use super::ShaderKey;
use crate::driver::{ActiveVariable, CompileOutput, LinkOutput, ShaderVariable};

#[derive(Debug)]
pub struct Shader {
    pub shader_type: u32,
    pub source: Option<String>,
    pub compiled: bool,
    pub info_log: String,
    pub attribs: Vec<ShaderVariable>,
    pub uniforms: Vec<ShaderVariable>,
}

impl Shader {
    pub fn new(shader_type: u32) -> Self {
        Self {
            shader_type,
            source: None,
            compiled: false,
            info_log: String::new(),
            attribs: Vec::new(),
            uniforms: Vec::new(),
        }
    }

    pub fn record_compile(&mut self, output: CompileOutput) {
        self.compiled = output.success;
        self.info_log = output.info_log;
        self.attribs = output.attribs;
        self.uniforms = output.uniforms;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Uniform {
    pub name: String,
    pub ty: u32,
    pub location: i32,
    /// Texture unit a sampler uniform reads from.
    pub sampler_unit: Option<i32>,
}

#[derive(Debug, Default)]
pub struct Program {
    pub vertex_shader: Option<ShaderKey>,
    pub fragment_shader: Option<ShaderKey>,
    pub linked: bool,
    pub info_log: String,
    /// `BindAttribLocation` requests, applied at the next link.
    pub attrib_bindings: HashMap<String, u32>,
    pub attribs: Vec<ActiveVariable>,
    pub uniforms: Vec<Uniform>,
}

impl Program {
    /// Slot for `shader_type`, if the type is one a program can hold.
    pub fn shader_slot(&mut self, shader_type: u32) -> Option<&mut Option<ShaderKey>> {
        match shader_type {
            gl::VERTEX_SHADER => Some(&mut self.vertex_shader),
            gl::FRAGMENT_SHADER => Some(&mut self.fragment_shader),
            _ => None,
        }
    }

    pub fn attached_count(&self) -> u32 {
        self.vertex_shader.is_some() as u32 + self.fragment_shader.is_some() as u32
    }

    pub fn record_link(&mut self, output: LinkOutput) {
        self.linked = output.success;
        self.info_log = output.info_log;
        if !output.success {
            self.attribs.clear();
            self.uniforms.clear();
            return;
        }
        self.attribs = output.attribs;
        self.uniforms = output
            .uniforms
            .into_iter()
            .map(|u| Uniform {
                sampler_unit: is_sampler(u.ty).then_some(0),
                name: u.name,
                ty: u.ty,
                location: u.location,
            })
            .collect();
    }

    pub fn attrib_location(&self, name: &str) -> i32 {
        self.attribs
            .iter()
            .find(|a| a.name == name)
            .map_or(-1, |a| a.location)
    }

    pub fn uniform_location(&self, name: &str) -> i32 {
        self.uniforms
            .iter()
            .find(|u| u.name == name)
            .map_or(-1, |u| u.location)
    }

    pub fn uniform(&self, location: i32) -> Option<&Uniform> {
        self.uniforms.iter().find(|u| u.location == location)
    }

    pub fn uniform_mut(&mut self, location: i32) -> Option<&mut Uniform> {
        self.uniforms.iter_mut().find(|u| u.location == location)
    }

    /// Whether the linked program reads attribute `index`.
    pub fn uses_attrib(&self, index: u32) -> bool {
        self.attribs.iter().any(|a| a.location == index as i32)
    }

    /// `(sampler type, unit)` for every sampler uniform.
    pub fn samplers(&self) -> impl Iterator<Item = (u32, i32)> + '_ {
        self.uniforms
            .iter()
            .filter_map(|u| Some((u.ty, u.sampler_unit?)))
    }
}

pub fn is_sampler(ty: u32) -> bool {
    matches!(ty, gl::SAMPLER_2D | gl::SAMPLER_CUBE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_result_exposes_locations_and_samplers() {
        let mut program = Program::default();
        program.record_link(LinkOutput {
            success: true,
            info_log: String::new(),
            attribs: vec![ActiveVariable {
                name: "a_position".into(),
                ty: gl::FLOAT_VEC4,
                location: 2,
            }],
            uniforms: vec![
                ActiveVariable {
                    name: "u_color".into(),
                    ty: gl::FLOAT_VEC4,
                    location: 0,
                },
                ActiveVariable {
                    name: "u_tex".into(),
                    ty: gl::SAMPLER_2D,
                    location: 1,
                },
            ],
        });

        assert_eq!(program.attrib_location("a_position"), 2);
        assert_eq!(program.attrib_location("a_missing"), -1);
        assert!(program.uses_attrib(2));
        assert!(!program.uses_attrib(0));
        assert_eq!(program.uniform_location("u_tex"), 1);
        assert_eq!(program.samplers().collect::<Vec<_>>(), vec![(gl::SAMPLER_2D, 0)]);
    }

    #[test]
    fn failed_link_drops_active_variables() {
        let mut program = Program::default();
        program.attribs.push(ActiveVariable {
            name: "stale".into(),
            ty: gl::FLOAT,
            location: 0,
        });
        program.record_link(LinkOutput {
            success: false,
            info_log: "nope".into(),
            ..LinkOutput::default()
        });
        assert!(!program.linked);
        assert!(program.attribs.is_empty());
        assert_eq!(program.info_log, "nope");
    }
}
