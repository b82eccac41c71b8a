//! Stable identifier selection (from `OpName`s, or `x_<id>` fallbacks).

use crate::{spv, Module, Options, TypeDef};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;

/// Words that can't be used as identifiers in the output.
const RESERVED: &[&str] = &[
    "alias", "array", "atomic", "bitcast", "bool", "break", "case", "const", "continue",
    "continuing", "default", "diagnostic", "discard", "else", "enable", "f16", "f32", "false",
    "fn", "for", "function", "i32", "if", "let", "loop", "mat2x2", "mat2x3", "mat2x4", "mat3x2",
    "mat3x3", "mat3x4", "mat4x2", "mat4x3", "mat4x4", "override", "private", "ptr", "requires",
    "return", "sampler", "sampler_comparison", "select", "storage", "struct", "switch",
    "texture_1d", "texture_2d", "texture_2d_array", "texture_3d", "texture_cube",
    "texture_cube_array", "texture_depth_2d", "texture_multisampled_2d", "true", "type", "u32",
    "uniform", "var", "vec2", "vec3", "vec4", "while", "workgroup",
];

/// Turn an arbitrary `OpName` string into a valid identifier (or `None` if
/// nothing usable is left).
pub fn sanitize(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let mut result: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    // Identifiers can't start with a digit, and `__` is reserved.
    if result.starts_with(|c: char| c.is_ascii_digit()) || result.starts_with("__") {
        result.insert(0, 'x');
    }
    if result == "_" {
        return None;
    }
    Some(result)
}

/// Assigns every ID a unique name, the first time it's asked about.
///
/// A module-level [`Namer`] (from [`Namer::for_module`]) is cloned for each
/// function, so that names local to one function never affect another.
#[derive(Clone)]
pub struct Namer {
    suggestions: Rc<FxHashMap<spv::Id, String>>,
    names: FxHashMap<spv::Id, String>,
    used: FxHashSet<String>,
}

impl Default for Namer {
    fn default() -> Self {
        Self {
            suggestions: Rc::default(),
            names: FxHashMap::default(),
            used: RESERVED.iter().map(|&s| s.to_string()).collect(),
        }
    }
}

impl Namer {
    /// Start from the module's debug names (if enabled) and entry-point
    /// names, and name everything that can be referenced from multiple
    /// functions (structs, global variables, functions), in definition order.
    pub fn for_module(module: &Module, options: &Options) -> Self {
        let cx = module.cx_ref();

        let mut suggestions: FxHashMap<_, _> = if options.use_debug_names {
            module
                .debug_names
                .names
                .iter()
                .filter_map(|(&id, &name)| Some((id, sanitize(&cx[name])?)))
                .collect()
        } else {
            FxHashMap::default()
        };
        // Entry-point names aren't debug info, so they're used regardless.
        for ep in &module.entry_points {
            if let Some(name) = sanitize(&ep.name) {
                suggestions.entry(ep.func).or_insert(name);
            }
        }
        let mut namer = Self { suggestions: Rc::new(suggestions), ..Self::default() };

        for &ty in module.types.values() {
            if let TypeDef::Struct { id, .. } = cx[ty] {
                let name = namer.suggestions.get(&id).cloned().unwrap_or_else(|| "S".into());
                namer.assign(id, name);
            }
        }
        for &id in module.global_vars.keys() {
            namer.name(id);
        }
        for &id in module.funcs.keys() {
            namer.name(id);
        }
        namer
    }

    /// The name of `id`, assigning one (its sanitized `OpName`, or `x_<id>`)
    /// if it doesn't have one yet.
    pub fn name(&mut self, id: spv::Id) -> String {
        if let Some(name) = self.names.get(&id) {
            return name.clone();
        }
        let base = self.suggestions.get(&id).cloned().unwrap_or_else(|| format!("x_{id}"));
        self.assign(id, base)
    }

    /// Look up an already-assigned name, without assigning new ones.
    pub fn get(&self, id: spv::Id) -> Option<&str> {
        self.names.get(&id).map(|s| &s[..])
    }

    fn assign(&mut self, id: spv::Id, base: String) -> String {
        let name = self.make_derived_name(base);
        self.names.insert(id, name.clone());
        name
    }

    /// Reserve a fresh name based on `base` (which is used as-is if free,
    /// otherwise with the first free `_1`, `_2`, ... suffix).
    pub fn make_derived_name(&mut self, base: impl Into<String>) -> String {
        let base = base.into();
        if self.used.insert(base.clone()) {
            return base;
        }
        let name = (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|candidate| !self.used.contains(candidate))
            .unwrap_or_default();
        self.used.insert(name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_names() {
        assert_eq!(sanitize("main").as_deref(), Some("main"));
        assert_eq!(sanitize("a.b[1]").as_deref(), Some("a_b_1_"));
        assert_eq!(sanitize("1st").as_deref(), Some("x1st"));
        assert_eq!(sanitize("__x").as_deref(), Some("x__x"));
        assert_eq!(sanitize(""), None);
    }

    #[test]
    fn unnamed_entry_points_use_their_entry_point_name() {
        let module = Module::lower_from_spv_asm(
            Rc::new(crate::Context::new()),
            r#"
            OpCapability Shader
            OpMemoryModel Logical GLSL450
            OpEntryPoint GLCompute %10 "cs_main"
            OpEntryPoint Fragment %20 "fs_main"
            OpExecutionMode %10 LocalSize 1 1 1
            OpExecutionMode %20 OriginUpperLeft
            OpName %20 "shade"
            %void = OpTypeVoid
            %voidfn = OpTypeFunction %void
            %10 = OpFunction %void None %voidfn
            %11 = OpLabel
            OpReturn
            OpFunctionEnd
            %20 = OpFunction %void None %voidfn
            %21 = OpLabel
            OpReturn
            OpFunctionEnd
            "#,
        )
        .unwrap();
        let id = |x| spv::Id::new(x).unwrap();

        let namer = Namer::for_module(&module, &Options::default());
        assert_eq!(namer.get(id(10)), Some("cs_main"));
        assert_eq!(namer.get(id(20)), Some("shade"));

        let options = Options { use_debug_names: false, ..Options::default() };
        let namer = Namer::for_module(&module, &options);
        assert_eq!(namer.get(id(10)), Some("cs_main"));
        assert_eq!(namer.get(id(20)), Some("fs_main"));
    }

    #[test]
    fn names_are_unique() {
        let mut namer = Namer::default();
        let id = |x| spv::Id::new(x).unwrap();

        assert_eq!(namer.name(id(5)), "x_5");
        assert_eq!(namer.name(id(5)), "x_5");
        assert_eq!(namer.make_derived_name("x_5"), "x_5_1");
        assert_eq!(namer.make_derived_name("x_5"), "x_5_2");
        assert_eq!(namer.make_derived_name("loop"), "loop_1");
        assert_eq!(namer.make_derived_name("x_5_c20"), "x_5_c20");
    }
}
