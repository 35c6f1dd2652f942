#![feature(test)]

use vocaltube::glottis::GlottisKind;
use vocaltube::session::Session;
use vocaltube::tds::TdsModel;
use vocaltube::tds::solver::SolverType;
use vocaltube::tl::TlModel;
use vocaltube::tube::{FIRST_PHARYNX_SECTION, Tube};

use test::Bencher;

extern crate test;

fn vowel_tube(shape: &str) -> Tube {
    let mut session = Session::new();
    assert!(session.tract.apply_shape(shape));
    session.tract_tube().unwrap()
}

fn time_steps(bencher: &mut Bencher, solver: SolverType) {
    let tube = vowel_tube("a");
    let mut tds = TdsModel::new();
    tds.options.solver = solver;
    tds.set_tube(&tube, false);
    tds.set_flow_source(100.0, Some(FIRST_PHARYNX_SECTION));

    bencher.iter(|| {
        for _ in 0..100 {
            test::black_box(tds.proceed_time_step());
        }
    });
}

#[bench]
fn time_steps_cholesky(bencher: &mut Bencher) {
    time_steps(bencher, SolverType::Cholesky);
}

#[bench]
fn time_steps_sor(bencher: &mut Bencher) {
    time_steps(bencher, SolverType::Sor);
}

#[bench]
fn formants_of_i(bencher: &mut Bencher) {
    let tube = vowel_tube("i");
    let mut tl = TlModel::new();
    tl.set_tube(&tube);

    bencher.iter(|| {
        test::black_box(tl.formants(4));
    });
}

#[bench]
fn static_vowel(bencher: &mut Bencher) {
    let mut session = Session::new();
    session.select_glottis(GlottisKind::Triangular);
    let tube = session.tract_tube().unwrap();

    bencher.iter(|| {
        session.synthesize_static_phoneme(&tube, 0.05, true).unwrap();
    });
}
