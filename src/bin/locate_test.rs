use courier::locator;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: locate_test <template.png> <screenshot.png> [screenshot2.png ...]");
        std::process::exit(1);
    }

    let template_path = &args[1];
    let template = match image::open(template_path) {
        Ok(img) => img.to_luma8(),
        Err(e) => {
            eprintln!("Failed to load template {template_path}: {e}");
            std::process::exit(1);
        }
    };
    println!(
        "Template: {} ({}x{})",
        template_path,
        template.width(),
        template.height()
    );

    const THRESHOLD: f32 = 0.85;
    println!("Threshold: {THRESHOLD:.2}");
    println!();

    for screenshot_path in &args[2..] {
        let screenshot = match image::open(screenshot_path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                eprintln!("Failed to load {screenshot_path}: {e}");
                continue;
            }
        };

        match locator::best_match(&screenshot, &template) {
            Some(m) => {
                let status = if m.score >= THRESHOLD { "MATCH" } else { "no match" };
                println!(
                    "{screenshot_path}: {status} score={:.4} pixel=({}, {})",
                    m.score, m.x, m.y
                );
            }
            None => {
                println!("{screenshot_path}: template larger than screenshot");
            }
        }
    }
}
