use std::{
    io,
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    /// How to start a session once setup succeeded.
    pub fn usage(&self) -> &'static [&'static str] {
        match self {
            Platform::Unix => &[
                "OPTION 1 - Direct script:",
                "   ./run_medgemma.sh",
                "",
                "OPTION 2 - Manual activation:",
                "   source activate_env.sh",
                "   medgemma",
            ],
            Platform::Windows => &[
                "OPTION 1 - Double click:",
                "   Double click 'run_medgemma.bat'",
                "",
                "OPTION 2 - From a terminal:",
                "   activate_env.bat",
                "   medgemma",
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptKind {
    Activate,
    Run,
}

pub struct ScriptTemplate {
    pub platform: Platform,
    pub kind: ScriptKind,
    pub file_name: &'static str,
    pub body: &'static str,
}

/// One activation and one run script per platform family.
///
/// Placeholders: `{project}`, `{cache}`, `{bin}`.
pub const TEMPLATES: &[ScriptTemplate] = &[
    ScriptTemplate {
        platform: Platform::Unix,
        kind: ScriptKind::Activate,
        file_name: "activate_env.sh",
        body: r#"#!/bin/bash
echo "Activating MedGemma environment..."
export HF_HOME="{cache}"
export PATH="{bin}:$PATH"
echo "Environment activated!"
echo "You can now run: medgemma"
exec bash
"#,
    },
    ScriptTemplate {
        platform: Platform::Windows,
        kind: ScriptKind::Activate,
        file_name: "activate_env.bat",
        body: r#"@echo off
echo Activating MedGemma environment...
set "HF_HOME={cache}"
set "PATH={bin};%PATH%"
echo Environment activated!
echo You can now run: medgemma
cmd /k
"#,
    },
    ScriptTemplate {
        platform: Platform::Unix,
        kind: ScriptKind::Run,
        file_name: "run_medgemma.sh",
        body: r#"#!/bin/bash
echo "Starting MedGemma..."
export HF_HOME="{cache}"
cd "{project}"
"{bin}/medgemma"
"#,
    },
    ScriptTemplate {
        platform: Platform::Windows,
        kind: ScriptKind::Run,
        file_name: "run_medgemma.bat",
        body: r#"@echo off
echo Starting MedGemma...
set "HF_HOME={cache}"
cd /d "{project}"
"{bin}\medgemma.exe"
pause
"#,
    },
];

/// Directories the scripts point at.
pub struct ScriptPaths {
    pub project: PathBuf,
    pub cache: PathBuf,
    pub bin: PathBuf,
}

impl ScriptTemplate {
    pub fn render(&self, paths: &ScriptPaths) -> String {
        self.body
            .replace("{project}", &paths.project.display().to_string())
            .replace("{cache}", &paths.cache.display().to_string())
            .replace("{bin}", &paths.bin.display().to_string())
    }
}

/// Writes every script of `kind` into `dir`, marking shell scripts executable.
pub fn write_scripts(dir: &Path, kind: ScriptKind, paths: &ScriptPaths) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for template in TEMPLATES.iter().filter(|t| t.kind == kind) {
        let path = dir.join(template.file_name);
        std::fs::write(&path, template.render(paths))?;
        if template.platform == Platform::Unix {
            mark_executable(&path)?;
        }
        written.push(path);
    }
    Ok(written)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
