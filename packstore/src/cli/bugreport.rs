use bugreport::{
    bugreport,
    collector::{CompileTimeInformation, EnvironmentVariables, OperatingSystem, SoftwareVersion},
    format::Markdown,
};

pub fn run() {
    bugreport!()
        .info(SoftwareVersion::default())
        .info(OperatingSystem::default())
        .info(EnvironmentVariables::list(&[
            "SHELL",
            "TERM",
            "PACKSTORE_DATA_DIR",
            "PACKSTORE_PORT",
        ]))
        .info(CompileTimeInformation::default())
        .print::<Markdown>();
}
