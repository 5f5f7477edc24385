//! Benchmarks for command building and output parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use qpipeline::commands::build_command;
use qpipeline::config::{RunContext, StageFlags};
use qpipeline::core::Stage;
use qpipeline::scheduler::{extract_job_id, parse_status};
use qpipeline::setup::ScanMapping;

fn bench_build_command(c: &mut Criterion) {
    let ctx = RunContext::new("/data/study", "sub01", "/images/qunex.sif", Some("himem".into()))
        .unwrap()
        .with_flags(StageFlags { flair: true, no_gpu: false });

    c.bench_function("build_command_all_processing", |b| {
        b.iter(|| {
            for stage in [
                Stage::PreFreesurfer,
                Stage::Freesurfer,
                Stage::PostFreesurfer,
                Stage::Diffusion,
            ] {
                black_box(build_command(black_box(&ctx), stage).unwrap());
            }
        });
    });
}

fn bench_parsers(c: &mut Criterion) {
    let submission = "Running qunex_container\n".repeat(50) + "Submitted batch job 4815162342\n";
    c.bench_function("extract_job_id", |b| {
        b.iter(|| extract_job_id("freesurfer", black_box(&submission)).unwrap());
    });

    c.bench_function("parse_status", |b| {
        b.iter(|| parse_status(black_box("JobId=1 JobState=RUNNING Reason=None")));
    });

    let import: String = (0..200)
        .map(|i| format!("---> linked {i}.nii.gz <-- sub-01_ses-1_dir{i}-AP_dwi.nii.gz\n"))
        .collect();
    c.bench_function("scan_mapping_parse", |b| {
        b.iter(|| ScanMapping::parse(black_box(&import)));
    });
}

criterion_group!(benches, bench_build_command, bench_parsers);
criterion_main!(benches);
