// src/emit/mod.rs

pub mod bash;

pub use bash::{
    emit_job_block, shell_single_quote, Conditionals, EmitOptions, JobEmit, ScriptBuilder,
};
