// build.rs — readiness-backend selection for kvcore.
//
// Picks the best kernel demultiplexer available for the compilation target
// and exposes the choice as a custom cfg, so exactly one backend module is
// compiled in:
//
//   use_epoll   — Linux, Android
//   use_kqueue  — macOS, iOS, FreeBSD, NetBSD, OpenBSD, DragonFly
//   use_select  — everything else (POSIX select(2) fallback)
fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    let epoll_targets = ["linux", "android"];
    let kqueue_targets = [
        "macos",
        "ios",
        "tvos",
        "watchos",
        "visionos",
        "freebsd",
        "netbsd",
        "openbsd",
        "dragonfly",
    ];

    let backend = if epoll_targets.contains(&target_os.as_str()) {
        "use_epoll"
    } else if kqueue_targets.contains(&target_os.as_str()) {
        "use_kqueue"
    } else {
        "use_select"
    };
    println!("cargo:rustc-cfg={backend}");
}
