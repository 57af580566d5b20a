use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Shader {
    hlsl: &'static str,
    profile: &'static str,
    cso_name: &'static str,
    env_key: &'static str,
    cfg_flag: &'static str,
}

const SHADERS: &[Shader] = &[
    Shader {
        hlsl: "src/platform/windows/quad_vs.hlsl",
        profile: "vs_5_0",
        cso_name: "quad_vs.cso",
        env_key: "QUAD_VS_CSO_PATH",
        cfg_flag: "has_precompiled_quad_vs",
    },
    Shader {
        hlsl: "src/platform/windows/blit_ps.hlsl",
        profile: "ps_5_0",
        cso_name: "blit_ps.cso",
        env_key: "BLIT_PS_CSO_PATH",
        cfg_flag: "has_precompiled_blit_ps",
    },
    Shader {
        hlsl: "src/platform/windows/downsample_ps.hlsl",
        profile: "ps_5_0",
        cso_name: "downsample_ps.cso",
        env_key: "DOWNSAMPLE_PS_CSO_PATH",
        cfg_flag: "has_precompiled_downsample_ps",
    },
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for shader in SHADERS {
        println!("cargo:rerun-if-changed={}", shader.hlsl);
        println!("cargo:rustc-check-cfg=cfg({})", shader.cfg_flag);
    }
    println!("cargo:rerun-if-env-changed=GLOW_CAPTURE_FXC_PATH");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "windows" {
        return;
    }

    // Optional escape hatch:
    // GLOW_CAPTURE_PRECOMPILE_SHADER=0 disables build-time fxc compilation.
    println!("cargo:rerun-if-env-changed=GLOW_CAPTURE_PRECOMPILE_SHADER");
    let precompile_enabled = env::var("GLOW_CAPTURE_PRECOMPILE_SHADER")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v == "0" || v == "false" || v == "no" || v == "off")
        })
        .unwrap_or(true);
    if !precompile_enabled {
        println!(
            "cargo:warning=GLOW_CAPTURE_PRECOMPILE_SHADER is disabled; will use runtime D3DCompile fallback"
        );
        return;
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    for shader in SHADERS {
        let hlsl_path = PathBuf::from(shader.hlsl);
        if !hlsl_path.exists() {
            continue;
        }
        let cso_path = out_dir.join(shader.cso_name);
        match compile_with_fxc(&hlsl_path, &cso_path, shader.profile) {
            Ok(()) => {
                // Tell rustc where the compiled shader is so shaders.rs can
                // include_bytes! it, and set a cfg flag to enable that path.
                println!("cargo:rustc-env={}={}", shader.env_key, cso_path.display());
                println!("cargo:rustc-cfg={}", shader.cfg_flag);
            }
            Err(detail) => {
                println!(
                    "cargo:warning=failed to precompile {} with fxc ({detail}); will use runtime D3DCompile fallback",
                    shader.hlsl
                );
            }
        }
    }
}

fn compile_with_fxc(hlsl_path: &Path, cso_path: &Path, profile: &str) -> Result<(), String> {
    let mut attempts = Vec::new();
    let mut attempted = false;
    for fxc in fxc_candidates() {
        if !is_path_lookup(&fxc) && !fxc.is_file() {
            continue;
        }
        attempted = true;
        match Command::new(&fxc)
            .args(["/T", profile, "/E", "main", "/O3", "/Fo"])
            .arg(cso_path)
            .arg(hlsl_path)
            .output()
        {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => {
                attempts.push(format!("{}: {}", fxc.display(), summarize_output(&output)))
            }
            Err(err) => attempts.push(format!("{}: {}", fxc.display(), err)),
        }
    }

    if !attempted {
        return Err(
            "no usable fxc.exe found (PATH/Windows SDK). set GLOW_CAPTURE_FXC_PATH to an explicit fxc path".to_string()
        );
    }

    Err(attempts.join(" | "))
}

fn is_path_lookup(path: &Path) -> bool {
    path.file_name().is_some()
        && path.parent().is_none()
        && path
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case("fxc.exe"))
}

fn summarize_output(output: &Output) -> String {
    let status = output
        .status
        .code()
        .map_or_else(|| "terminated".to_string(), |code| format!("exit {code}"));
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let mut diagnostic = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        "no compiler diagnostic output".to_string()
    };
    if diagnostic.len() > 260 {
        diagnostic.truncate(260);
        diagnostic.push_str("...");
    }
    format!("{status}, {diagnostic}")
}

fn fxc_candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(path) = env::var("GLOW_CAPTURE_FXC_PATH") {
        let path = path.trim();
        if !path.is_empty() {
            out.push(PathBuf::from(path));
        }
    }

    out.push(PathBuf::from("fxc.exe"));

    if let Ok(bin_path) = env::var("WindowsSdkVerBinPath") {
        let bin = PathBuf::from(bin_path);
        out.push(bin.join("x64").join("fxc.exe"));
        out.push(bin.join("x86").join("fxc.exe"));
    }

    if let (Ok(sdk_dir), Ok(sdk_version)) =
        (env::var("WindowsSdkDir"), env::var("WindowsSDKVersion"))
    {
        let version = sdk_version.trim_matches(|c| c == '\\' || c == '/');
        if !version.is_empty() {
            let bin = PathBuf::from(sdk_dir).join("bin").join(version);
            out.push(bin.join("x64").join("fxc.exe"));
            out.push(bin.join("x86").join("fxc.exe"));
        }
    }

    out.extend(scan_windows_kits_fxc());

    dedup_paths(out)
}

fn scan_windows_kits_fxc() -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(program_files) = env::var("ProgramFiles(x86)") else {
        return out;
    };

    let bin_root = PathBuf::from(program_files)
        .join("Windows Kits")
        .join("10")
        .join("bin");
    let Ok(entries) = std::fs::read_dir(bin_root) else {
        return out;
    };

    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    dirs.reverse();

    for dir in dirs {
        out.push(dir.join("x64").join("fxc.exe"));
        out.push(dir.join("x86").join("fxc.exe"));
    }

    out
}

fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut unique = Vec::new();
    for path in paths {
        if unique.iter().any(|seen| seen == &path) {
            continue;
        }
        unique.push(path);
    }
    unique
}
