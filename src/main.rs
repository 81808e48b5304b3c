fn main() {
    carelog_lib::run()
}
