fn main() {
    bgexec::bgexec_main()
}
