use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nailang::config::{Defines, EngineConfig};
use nailang::nailang::{parse_program, NailangRuntime, NoHost};
use nailang::xcomp;

fn make_program(blocks: usize) -> String {
    let mut src = String::new();
    for i in 0..blocks {
        src.push_str(&format!(
            "#Block.Main(\"b{i}\"){{\n\
             i = 0;\n\
             sum = 0;\n\
             @While(i < 50)\n\
             #Block.Body(\"body\"){{\n\
                 i += 1;\n\
                 @If((i % 2) == 0)\n\
                 sum += i * {i};\n\
             }}\n\
             }}\n"
        ));
    }
    src
}

fn make_template(kernels: usize) -> String {
    let mut src = String::from(
        "@xcomp.TemplateArgs(ty)\n\
         @xcomp.ReplaceVariable()\n\
         #xcomp.Template(\"load\"){\n\
         $$!{ty} load($$!{ty}* p) { return *p; }\n\
         }\n",
    );
    for i in 0..kernels {
        src.push_str(&format!(
            "@xcomp.Replace()\n\
             #xcomp.Kernel(\"k{i}\"){{\n\
             $$!xcomp.CodeBlock(load, $$!{{@f32v4}})\n\
             $$!{{#vt}} v = $$!{{scale}} * {i};\n\
             $$@ debug {{ printf(\"k{i}\"); }}@$$\n\
             }}\n"
        ));
    }
    src
}

fn bench_engine(c: &mut Criterion) {
    let program = make_program(20);
    let template = make_template(20);
    let mut defines = Defines::new();
    for def in ["vt=\"u8v4\"", "scale=3", "debug=false"] {
        defines.define(def).unwrap();
    }
    let config = EngineConfig::default();

    let mut g = c.benchmark_group("engine");
    g.bench_function("parse", |b| b.iter(|| parse_program(black_box(&program), "bench.nl").unwrap()));
    g.bench_function("execute", |b| {
        let parsed = parse_program(&program, "bench.nl").unwrap();
        b.iter(|| {
            let mut rt = NailangRuntime::default();
            rt.execute_program(&mut NoHost, black_box(&parsed)).unwrap();
            rt
        })
    });
    g.bench_function("render", |b| {
        b.iter(|| xcomp::render(black_box(&template), "bench.xcomp", &config, &defines).unwrap())
    });
    g.finish();
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
