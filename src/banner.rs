use std::io::{self, Write};
use tui_banner::{Align, Banner, Fill, Gradient, Palette};

/// Print a cinematic banner for webtube
pub fn print_banner() {
    let banner = Banner::new("webtube")
        .unwrap()
        .gradient(Gradient::diagonal(Palette::from_hex(&[
            "#FF0040",
            "#FF4000",
            "#FF8000",
            "#FFC000",
            "#C0FF00",
            "#40FF80",
            "#00C0FF",
            "#0040FF",
        ])))
        .fill(Fill::Keep)
        .align(Align::Left)
        .padding(0);

    let output = banner.render();
    println!("{}", output);
    println!(
        "  {} {}",
        console::style("Video Converter").white().bold(),
        console::style("• Paste a link • Pick a format • Download").dim()
    );
    println!();

    let _ = io::stdout().flush();
}
