use crate::process::CommandRunner;
use sysinfo::System;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Below this much VRAM the model may not fit on the accelerator.
pub const LOW_VRAM_GB: f64 = 6.0;
/// Below this much system RAM loading may struggle.
pub const LOW_RAM_GB: f64 = 8.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Accelerator {
    pub name: String,
    pub memory_gb: f64,
}

/// What the probe found. Purely advisory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HardwareReport {
    pub accelerators: Vec<Accelerator>,
    pub ram_gb: Option<f64>,
}

impl HardwareReport {
    /// Inspects accelerators and system memory. Never fails: anything that
    /// cannot be queried is reported as absent.
    pub fn probe<R: CommandRunner>(runner: &R) -> Self {
        let accelerators = runner
            .run(
                "nvidia-smi",
                &["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"],
                None,
            )
            .ok()
            .filter(|output| output.status.success())
            .map(|output| parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout)))
            .unwrap_or_default();

        let mut system = System::new();
        system.refresh_memory();
        let total = system.total_memory();
        let ram_gb = (total > 0).then(|| total as f64 / GIB);

        Self {
            accelerators,
            ram_gb,
        }
    }

    pub fn primary_accelerator(&self) -> Option<&Accelerator> {
        self.accelerators.first()
    }

    /// Human-readable report, warnings included.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.primary_accelerator() {
            Some(gpu) => {
                lines.push(format!("GPU: {}", gpu.name));
                lines.push(format!("VRAM: {:.1} GB", gpu.memory_gb));
                if gpu.memory_gb < LOW_VRAM_GB {
                    lines.push("WARNING: low VRAM, memory problems are possible".to_string());
                    lines.push("Consider DEVICE=cpu in .env if you hit errors".to_string());
                }
            }
            None => {
                lines.push("GPU not available, using CPU".to_string());
                lines.push("Processing will be slower but works".to_string());
            }
        }
        match self.ram_gb {
            Some(ram) => {
                lines.push(format!("RAM: {ram:.1} GB"));
                if ram < LOW_RAM_GB {
                    lines.push("WARNING: limited RAM, problems are possible".to_string());
                }
            }
            None => lines.push("RAM: unknown".to_string()),
        }
        lines
    }
}

/// Parses `name, memory MiB` rows as printed by `nvidia-smi` in CSV mode.
fn parse_nvidia_smi(stdout: &str) -> Vec<Accelerator> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, memory) = line.rsplit_once(',')?;
            let mib: f64 = memory.trim().parse().ok()?;
            Some(Accelerator {
                name: name.trim().to_string(),
                memory_gb: mib / 1024.0,
            })
        })
        .collect()
}
