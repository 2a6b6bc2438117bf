// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::JobParameters;

/// A command for the compute host, kept as a literal argument vector. Local
/// execution passes the vector straight to the process spawner; remote
/// execution renders it to a single shell line with each argument quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Single-string form for the remote shell to parse.
    pub fn shell_line(&self) -> String {
        let mut line = sh_escape(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&sh_escape(arg));
        }
        line
    }
}

/// Very small, safe-ish shell escaper for paths and arguments.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Bare invocation used to probe that the compute binary exists and is
/// executable on the selected host.
pub fn binary_probe_command(params: &JobParameters) -> CommandSpec {
    CommandSpec::new(&params.binary)
}

/// Verifies that the model and the trained weights fit together on the
/// execution host.
pub fn weights_check_command(params: &JobParameters, model_path: &str) -> CommandSpec {
    CommandSpec::new(&params.binary)
        .arg("check_model_and_weights_h5")
        .arg("-model")
        .arg(model_path)
        .arg("-weights")
        .arg(&params.weights_path)
        .args(params.gpu.as_args())
}

/// The segmentation pass itself. The binary overwrites the input blob in
/// place, so `-outfileH5` equals `-infileH5`.
pub fn predict_command(params: &JobParameters, infile: &str, model_path: &str) -> CommandSpec {
    CommandSpec::new(&params.binary)
        .arg("tiled_predict")
        .arg("-infileH5")
        .arg(infile)
        .arg("-outfileH5")
        .arg(infile)
        .arg("-model")
        .arg(model_path)
        .arg("-weights")
        .arg(&params.weights_path)
        .arg("-iterations")
        .arg("0")
        .arg(&params.tiling.flag)
        .arg(&params.tiling.value)
        .args(params.gpu.as_args())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::{GpuSelector, TilingParam};
    use std::path::PathBuf;

    fn params() -> JobParameters {
        JobParameters {
            binary: "caffe_unet".to_string(),
            model_file: PathBuf::from("/models/2d_cell_net.h5"),
            weights_path: "/data/weights.caffemodel.h5".to_string(),
            local_weights: None,
            process_folder: "/scratch/tilerun".to_string(),
            gpu: GpuSelector::Index(0),
            tiling: TilingParam::new("-n_tiles", "4").unwrap(),
            keep_original: false,
            output_scores: false,
        }
    }

    #[test]
    fn predict_command_matches_the_binary_contract() {
        let cmd = predict_command(&params(), "/scratch/tilerun/seg-1.h5", "/scratch/tilerun/seg-1_model.h5");
        assert_eq!(cmd.program, "caffe_unet");
        assert_eq!(
            cmd.args,
            vec![
                "tiled_predict",
                "-infileH5",
                "/scratch/tilerun/seg-1.h5",
                "-outfileH5",
                "/scratch/tilerun/seg-1.h5",
                "-model",
                "/scratch/tilerun/seg-1_model.h5",
                "-weights",
                "/data/weights.caffemodel.h5",
                "-iterations",
                "0",
                "-n_tiles",
                "4",
                "-gpu",
                "0",
            ]
        );
    }

    #[test]
    fn predict_command_omits_gpu_when_none() {
        let mut p = params();
        p.gpu = GpuSelector::None;
        let cmd = predict_command(&p, "/in.h5", "/model.h5");
        assert!(!cmd.args.contains(&"-gpu".to_string()));
    }

    #[test]
    fn weights_check_command_includes_gpu_args() {
        let mut p = params();
        p.gpu = GpuSelector::All;
        let cmd = weights_check_command(&p, "/scratch/model.h5");
        assert_eq!(
            cmd.args,
            vec![
                "check_model_and_weights_h5",
                "-model",
                "/scratch/model.h5",
                "-weights",
                "/data/weights.caffemodel.h5",
                "-gpu",
                "all",
            ]
        );
    }

    #[test]
    fn shell_line_quotes_every_argument() {
        let cmd = CommandSpec::new("caffe_unet")
            .arg("tiled_predict")
            .arg("-infileH5")
            .arg("/tmp/it's here.h5");
        assert_eq!(
            cmd.shell_line(),
            r#"'caffe_unet' 'tiled_predict' '-infileH5' '/tmp/it'\''s here.h5'"#
        );
    }
}
