use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
    }

    event Transfer(address indexed from, address indexed to, uint256 value);
}
