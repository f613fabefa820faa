// build.rs
// 记录构建时间, 作为病毒库更新日期的兜底值
fn main() {
    println!("cargo:rerun-if-env-changed=AVAST_BUILD_TIME");

    let build_time = std::env::var("AVAST_BUILD_TIME")
        .unwrap_or_else(|_| chrono::Utc::now().to_rfc2822());

    println!("cargo:rustc-env=AVAST_BUILD_TIME={}", build_time);
}
