//! Model listing

use anyhow::Result;
use pixforge_gen::ModelRegistry;

pub fn run() -> Result<()> {
    let registry = ModelRegistry::builtin();
    for model in registry.iter() {
        println!("{} ({})", model.id, model.provider);
        println!("  {}", model.description);
        println!("  sizes:     {} (default {})", model.sizes.join(", "), model.default_size);
        println!(
            "  qualities: {} (default {})",
            model.qualities.join(", "),
            model.default_quality
        );
        if !model.styles.is_empty() {
            println!(
                "  styles:    {} (default {})",
                model.styles.join(", "),
                model.default_style.unwrap_or("none")
            );
        }
        let formats: Vec<&str> = model.formats.iter().map(|f| f.extension()).collect();
        println!("  formats:   {}", formats.join(", "));
        println!(
            "  max images: {}, transparency: {}",
            model.max_images,
            if model.supports_transparency { "yes" } else { "no" }
        );
        println!();
    }
    Ok(())
}
