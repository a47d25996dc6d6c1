use ftircore::algorithm::normalization::denormalize;
use ftircore::config::PipelineConfig;
use ftircore::pipeline::analyze;
use ftircore::synthetic::SyntheticSpectrum;

// Runs a synthetic aged-binder spectrum through the pipeline, `RUST_LOG=debug` shows every stage.
// An optional first argument names a JSON configuration file.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };

    let raw = SyntheticSpectrum::new(600.0, 4000.0, 0.5)
        .with_band(1030.0, 9.0, 0.025)
        .with_band(1376.0, 7.0, 0.045)
        .with_band(1460.0, 11.0, 0.08)
        .with_band(1600.0, 10.0, 0.02)
        .with_band(1700.0, 10.0, 0.03)
        .with_band(2850.0, 12.0, 0.12)
        .with_band(2920.0, 15.0, 0.2)
        .with_linear_baseline(0.04, 1.5e-5)
        .with_noise(2e-5, 2024)
        .build()?;

    let analysis = analyze(&raw, &config)?;
    println!("{}", raw);
    println!("Normalization ({}): beta = {:.5}", config.normalization, analysis.beta);
    match &analysis.indices {
        Ok(indices) => {
            println!("ICO  baseline {:.4}  tangential {:.4}", indices.ico_baseline, indices.ico_tangential);
            println!("ISO  baseline {:.4}  tangential {:.4}", indices.iso_baseline, indices.iso_tangential);
            for group in [&indices.carbonyl, &indices.sulfoxide, &indices.aliphatic] {
                println!(
                    "  {:<10} window [{:.1}, {:.1}]  peak(s) {:?}  area {:.4} / {:.4}",
                    group.group.to_string(), group.window.0, group.window.1, group.x_peak, group.area_baseline, group.area_tangential
                );
            }
        }
        Err(e) => println!("Band indices unavailable: {}", e),
    }

    match &analysis.deconvolution {
        Ok(deconvolution) => {
            println!("Deconvolution: {} components, ICO {:.4}, ISO {:.4}", deconvolution.components.len(), deconvolution.ico, deconvolution.iso);
            for component in deconvolution.components.iter() {
                println!("  {}", component);
            }
        }
        Err(e) => println!("Deconvolution unavailable: {}", e),
    }

    let restored = denormalize(&analysis.processed, analysis.beta)?;
    println!("Processed curve before normalization: {}", restored);
    Ok(())
}
