// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理后端
// 负责: 会话构建、执行器选择、模型元数据(类别名/输入尺寸)读取

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use ndarray::{Array, IxDyn};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

/// YOLO 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YOLOTask {
    /// 目标检测
    Detect,
    /// 实例分割
    Segment,
}

/// 执行器 (Execution Provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

/// 后端构建参数
#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: PathBuf,
    pub task: YOLOTask,
    pub ep: OrtEP,
    /// (height, width), 仅在模型输入为动态尺寸时使用
    pub image_size: (Option<u32>, Option<u32>),
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    height: u32,
    width: u32,
    names: Option<Vec<String>>,
    outputs: Vec<String>,
    nc: Option<u32>,
    nm: Option<u32>,
    author: Option<String>,
    version: Option<String>,
    height_dynamic: bool,
    width_dynamic: bool,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        if !args.f.is_file() {
            bail!("模型文件不存在: {}", args.f.display());
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers(Self::providers(args.ep))?
            .commit_from_file(&args.f)
            .with_context(|| format!("无法加载ONNX模型: {}", args.f.display()))?;

        // 输入: [batch, 3, height, width]
        let input = session
            .inputs
            .first()
            .context("模型没有输入节点")?;
        let dims: Vec<i64> = input
            .input_type
            .tensor_shape()
            .map(|shape| shape.iter().copied().collect())
            .unwrap_or_default();
        let (height, height_dynamic) = Self::resolve_dim(dims.get(2), args.image_size.0);
        let (width, width_dynamic) = Self::resolve_dim(dims.get(3), args.image_size.1);

        let outputs: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let output_dims: Vec<Vec<i64>> = session
            .outputs
            .iter()
            .map(|o| {
                o.output_type
                    .tensor_shape()
                    .map(|shape| shape.iter().copied().collect())
                    .unwrap_or_default()
            })
            .collect();

        // 元数据: names / author / version
        let (names, author, version) = match session.metadata() {
            Ok(meta) => (
                meta.custom("names")
                    .ok()
                    .flatten()
                    .map(|raw| Self::parse_names(&raw)),
                meta.custom("author").ok().flatten(),
                meta.custom("version").ok().flatten(),
            ),
            Err(_) => (None, None, None),
        };

        // 分割模型第二个输出是 protos: [batch, nm, mh, mw]
        let nm = match args.task {
            YOLOTask::Segment => output_dims
                .get(1)
                .and_then(|d| d.get(1))
                .filter(|&&n| n > 0)
                .map(|&n| n as u32),
            YOLOTask::Detect => None,
        };
        let nc = match &names {
            Some(names) if !names.is_empty() => Some(names.len() as u32),
            _ => output_dims
                .first()
                .and_then(|d| d.get(1))
                .filter(|&&n| n > 0)
                .map(|&n| (n as u32).saturating_sub(4 + nm.unwrap_or(0))),
        };

        debug!(
            "模型输入 {}x{} (动态: {}/{}), 输出: {:?}",
            width, height, width_dynamic, height_dynamic, outputs
        );

        Ok(Self {
            session,
            ep: args.ep,
            height,
            width,
            names,
            outputs,
            nc,
            nm,
            author,
            version,
            height_dynamic,
            width_dynamic,
        })
    }

    fn providers(ep: OrtEP) -> Vec<ExecutionProviderDispatch> {
        let mut eps = Vec::new();
        match ep {
            #[cfg(feature = "tensorrt")]
            OrtEP::Trt(device_id) => eps.push(
                ort::execution_providers::TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ),
            #[cfg(feature = "cuda")]
            OrtEP::CUDA(device_id) => eps.push(
                ort::execution_providers::CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ),
            other => {
                if other != OrtEP::CPU {
                    info!("⚠️ 执行器 {:?} 未编译进当前构建, 使用CPU", other);
                }
            }
        }
        eps.push(CPUExecutionProvider::default().build());
        eps
    }

    fn resolve_dim(dim: Option<&i64>, fallback: Option<u32>) -> (u32, bool) {
        match dim {
            Some(&d) if d > 0 => (d as u32, false),
            _ => (fallback.unwrap_or(640), true),
        }
    }

    /// 解析 Ultralytics 导出的类别表: "{0: 'person', 1: 'bicycle', ...}"
    pub fn parse_names(raw: &str) -> Vec<String> {
        let mut names = Vec::new();
        for entry in raw.trim_matches(|c| c == '{' || c == '}').split(", ") {
            if let Some((_, name)) = entry.split_once(':') {
                let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    pub fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let t = std::time::Instant::now();
        let input = Tensor::from_array(xs)?;
        let outputs = self.session.run(ort::inputs![input])?;
        let mut ys = Vec::with_capacity(self.outputs.len());
        for name in &self.outputs {
            let y = outputs[name.as_str()].try_extract_array::<f32>()?;
            ys.push(y.into_owned());
        }
        if profile {
            debug!("[ORT Run]: {:?}", t.elapsed());
        }
        Ok(ys)
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn is_height_dynamic(&self) -> bool {
        self.height_dynamic
    }

    pub fn is_width_dynamic(&self) -> bool {
        self.width_dynamic
    }

    pub fn names(&self) -> Option<Vec<String>> {
        self.names.clone()
    }

    pub fn nc(&self) -> Option<u32> {
        self.nc
    }

    pub fn nm(&self) -> Option<u32> {
        self.nm
    }

    pub fn author(&self) -> Option<&String> {
        self.author.as_ref()
    }

    pub fn version(&self) -> Option<&String> {
        self.version.as_ref()
    }
}
