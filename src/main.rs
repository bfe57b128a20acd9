//! # arg-sample
//!
//! CLI entry point: parse arguments, build the model, load the sites,
//! sample an initial ARG, and run the resampling loop, streaming statistics
//! and periodic SMC snapshots.

use std::fs::File;
use std::io::BufWriter;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use argweaver::config::Config;
use argweaver::io::rates::{read_mask, read_rate_map};
use argweaver::io::{write_smc, Sites, StatsWriter};
use argweaver::model::TimeGrid;
use argweaver::sample::{run_sampler, sample_initial_arg, SamplerOpts};
use argweaver::ArgModel;

fn main() -> anyhow::Result<()> {
    let config = Config::parse_and_validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    let filter = if config.quiet { "error" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(false)
        .init();

    let mut sites = Sites::read(&config.sites)
        .with_context(|| format!("reading sites from {}", config.sites.display()))?;
    info!(
        nseqs = sites.nseqs(),
        nsites = sites.nsites(),
        region = format!("{}:{}-{}", sites.chrom, sites.start + 1, sites.end),
        "loaded sites"
    );

    if let Some(path) = &config.maskmap {
        let mask = read_mask(path).with_context(|| "reading mask map")?;
        sites.apply_mask(&mask);
    }

    let grid = TimeGrid::log_spaced(config.ntimes, config.maxtime, config.delta)?;
    let mut model = if config.popsize.len() == 1 {
        ArgModel::new(grid, config.popsize[0], config.recombrate, config.mutrate)?
    } else {
        ArgModel::with_popsizes(
            grid,
            config.popsize.clone(),
            config.recombrate,
            config.mutrate,
        )?
    };
    model.infinite_sites = config.infsites;
    model.infsites_penalty = config.infsites_penalty;
    if let Some(path) = &config.mutmap {
        model.mutmap = Some(read_rate_map(path).with_context(|| "reading mutation map")?);
    }
    if let Some(path) = &config.recombmap {
        model.recombmap = Some(read_rate_map(path).with_context(|| "reading recombination map")?);
    }

    if config.compress > 1 {
        sites.compress(config.compress)?;
        model.mu *= config.compress as f64;
        model.rho *= config.compress as f64;
        info!(factor = config.compress, "compressed sites");
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!("building initial ARG by sequential threading");
    let mut trees = sample_initial_arg(&model, &sites, &mut rng)?;

    let stats_path = config.output.with_extension("stats");
    let mut stats_out = StatsWriter::new(BufWriter::new(
        File::create(&stats_path)
            .with_context(|| format!("creating {}", stats_path.display()))?,
    ))?;

    let opts = SamplerOpts {
        iters: config.iters,
        window: config.resample_window,
        gibbs: config.gibbs,
        climb: config.climb,
    };
    let names = sites.names.clone();
    let chrom = sites.chrom.clone();
    let prefix = config.output.clone();
    let sample_step = config.sample_step.max(1);

    run_sampler(&model, &mut trees, &sites, &opts, &mut rng, |iter, stats, trees| {
        info!(
            iter,
            joint = stats.joint,
            recombs = stats.recombs,
            "iteration complete"
        );
        stats_out.write_row(iter, stats)?;
        if iter % sample_step == 0 || iter == opts.iters {
            let path = prefix.with_extension(format!("{iter}.smc"));
            let out = BufWriter::new(File::create(&path)?);
            write_smc(out, trees, &model.grid, &chrom, &names)?;
        }
        Ok(())
    })?;

    info!("done");
    Ok(())
}
