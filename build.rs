use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../avcap.template.toml");

    let template = r#"# avcap configuration template
# Copy this file to 'avcap.toml'; every key is optional.

[video]
width = 1920
height = 1080
expected_frame_rate = 60
max_key_frame_interval_secs = 2.0
allow_frame_reordering = true

[audio]
sample_rate = 44100
channels = 1
bitrate = 192000

[writer]
audio_muted = false

# Where the uploader sends packets (overridden by AVCAP_UPLOAD_URL)
[upload]
endpoint = "http://127.0.0.1:3000/upload"
"#;

    if !template_path.exists() {
        let _ = fs::write(template_path, template);
    }
    println!("cargo:rerun-if-changed=build.rs");
}
